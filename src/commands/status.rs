use anyhow::Result;

use crate::config::AppConfig;
use crate::health::{format_bytes, format_uptime, ResourceSampler, SystemSampler};
use crate::run_state::RunState;

use super::common::{describe_state, supervisor};

pub(crate) fn run(config: &AppConfig, name: String) -> Result<()> {
    let status = supervisor(config).status(&name)?;
    let entry = &status.entry;
    let paths = config.server_paths(&entry.name);

    println!("Name:        {}", entry.name);
    println!("Status:      {}", describe_state(&status.state, status.pid));
    println!("Type:        {}", entry.server_type);
    if let Some(version) = entry.version.as_deref() {
        println!("Version:     {version}");
    }
    println!("Port:        {}", entry.port);
    println!("RAM:         {}", entry.ram);
    println!("Jar:         {}", entry.jar);
    println!(
        "Difficulty:  {}{}",
        entry.difficulty,
        if entry.hardcore { " (hardcore)" } else { "" }
    );
    println!("View Dist.:  {}", entry.render_distance);
    if !entry.description.is_empty() {
        println!("Description: {}", entry.description);
    }
    if let RunState::RunningFallback(descriptor) = &status.state {
        println!("Tracked By:  {}", descriptor.working_dir.display());
    }
    if let Some(pid) = status.pid {
        let sample = SystemSampler::new(&paths.dir).sample(pid);
        if let Some(usage) = sample.process {
            println!("Uptime:      {}", format_uptime(usage.run_time));
            println!("Memory:      {}", format_bytes(usage.memory_bytes));
        }
    }
    println!("Directory:   {}", paths.dir.display());
    println!("Console Log: {}", paths.console_log.display());

    Ok(())
}

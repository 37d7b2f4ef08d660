use anyhow::Result;

use crate::config::AppConfig;
use crate::supervisor::StartOutcome;

use super::common::supervisor;

pub(crate) async fn run(config: &AppConfig, name: String) -> Result<()> {
    println!("Restarting {name}...");
    match supervisor(config).restart(&name).await? {
        StartOutcome::Direct(pid) => println!("Server {name} restarted (pid {pid})."),
        StartOutcome::Fallback => println!("Server {name} restarted (pid unknown)."),
    }

    Ok(())
}

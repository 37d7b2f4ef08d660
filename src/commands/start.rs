use anyhow::Result;

use crate::config::AppConfig;
use crate::supervisor::StartOutcome;

use super::common::supervisor;

pub(crate) async fn run(config: &AppConfig, name: String) -> Result<()> {
    println!("Starting {name}...");
    match supervisor(config).start(&name).await? {
        StartOutcome::Direct(pid) => println!("Server {name} started (pid {pid})."),
        StartOutcome::Fallback => {
            println!("Server {name} started, but its pid could not be captured.");
            println!("It is tracked by directory; stop will terminate it directly.");
        }
    }

    Ok(())
}

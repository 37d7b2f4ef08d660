use anyhow::Result;

use crate::config::AppConfig;
use crate::supervisor::StopTier;

use super::common::supervisor;

pub(crate) async fn run(config: &AppConfig, name: String) -> Result<()> {
    println!("Stopping {name}...");
    let outcome = supervisor(config).stop(&name).await?;
    let how = match outcome.tier {
        StopTier::Watcher => "by its watcher",
        StopTier::Terminate => "after a termination request",
        StopTier::ForceKill => "by force",
    };
    println!("Server {name} (pid {}) stopped {how}.", outcome.pid);

    Ok(())
}

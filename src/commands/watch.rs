use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::control::{ProcessHost, SystemProcesses};
use crate::run_state::{RunState, RunStateStore};
use crate::watcher::Watcher;

pub(crate) async fn run(config: &AppConfig, server_name: String, target_pid: u32) -> Result<()> {
    let host: Arc<dyn ProcessHost> = Arc::new(SystemProcesses);

    let tracked = RunStateStore::new(&config.servers_dir, host.clone(), config.timings)
        .load(&server_name);
    if tracked != RunState::RunningDirect(target_pid) {
        warn!("run state of {server_name} does not track pid {target_pid} ({tracked:?}), watching anyway");
    }

    let mut watcher = Watcher::new(
        &server_name,
        target_pid,
        &config.servers_dir,
        host,
        config.timings,
    );
    watcher.run().await;
    debug!("watcher for {server_name} finished in state {:?}", watcher.state());

    Ok(())
}

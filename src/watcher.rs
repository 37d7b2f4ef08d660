//! The per-server watcher.
//!
//! Runs as `craftmgr watch <server> <pid>` next to the java process it guards.
//! It polls the command file and, on `stop`, kills the whole process tree and
//! removes the run-state marker. It does not notice the java process dying on
//! its own; stale markers are cleaned up by the next run-state load.

use std::path::Path;
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::command_channel::{CommandChannel, ControlCommand};
use crate::config::LifecycleTimings;
use crate::control::ProcessHost;
use crate::run_state::RunStateStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Watching,
    Terminating,
    Exited,
}

pub struct Watcher {
    server: String,
    target_pid: u32,
    host: Arc<dyn ProcessHost>,
    channel: CommandChannel,
    run_state: RunStateStore,
    timings: LifecycleTimings,
    state: WatcherState,
}

impl Watcher {
    pub fn new(
        server: &str,
        target_pid: u32,
        servers_dir: &Path,
        host: Arc<dyn ProcessHost>,
        timings: LifecycleTimings,
    ) -> Self {
        Self {
            server: server.to_string(),
            target_pid,
            channel: CommandChannel::new(servers_dir),
            run_state: RunStateStore::new(servers_dir, host.clone(), timings),
            host,
            timings,
            state: WatcherState::Idle,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Watches until a `stop` command has been handled.
    pub async fn run(&mut self) {
        self.transition(WatcherState::Watching);
        info!(
            "watching server {} (pid {}), polling every {:?}",
            self.server, self.target_pid, self.timings.watcher_poll
        );

        let heartbeat_every = self.timings.watcher_heartbeat_every.max(1);
        let mut polls: u64 = 0;
        loop {
            sleep(self.timings.watcher_poll).await;
            polls += 1;

            match self.channel.try_consume(&self.server) {
                Ok(Some(ControlCommand::Stop)) => break,
                Ok(Some(ControlCommand::Unknown(token))) => {
                    warn!("ignoring unknown command {token:?} for {}", self.server)
                }
                Ok(None) => {}
                Err(err) => warn!("failed to read command for {}: {err:#}", self.server),
            }

            if polls % u64::from(heartbeat_every) == 0 {
                debug!(
                    "watcher heartbeat for {} (pid {}, {polls} polls)",
                    self.server, self.target_pid
                );
            }
        }

        self.terminate().await;
    }

    async fn terminate(&mut self) {
        self.transition(WatcherState::Terminating);
        info!(
            "stop requested, killing process tree of {} (pid {})",
            self.server, self.target_pid
        );

        if let Err(err) = self.host.kill_tree(self.target_pid) {
            error!("failed to kill pid {}: {err:#}", self.target_pid);
        }
        sleep(self.timings.watcher_kill_settle).await;

        if let Err(err) = self.run_state.clear(&self.server) {
            warn!("failed to remove run state for {}: {err:#}", self.server);
        }
        if let Err(err) = self.channel.clear(&self.server) {
            warn!("failed to remove command file for {}: {err:#}", self.server);
        }

        self.transition(WatcherState::Exited);
    }

    fn transition(&mut self, next: WatcherState) {
        info!("watcher {}: {:?} -> {next:?}", self.server, self.state);
        self.state = next;
    }
}

//! Start, stop, restart and delete for provisioned servers.
//!
//! There is no in-memory registry of running servers: every operation reads
//! the run-state marker, re-validates it, and acts on what it finds.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::command_channel::{CommandChannel, ControlCommand};
use crate::config::AppConfig;
use crate::control::ProcessHost;
use crate::errors::CraftError;
use crate::events::{EventSink, LifecycleEvent};
use crate::launch::{LaunchPlan, Launcher};
use crate::locator::ProcessLocator;
use crate::run_state::{ResolvedState, RunState, RunStateStore};
use crate::server::{ServerEntry, ServerPhase};
use crate::storage::{load_registry, save_registry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Pid captured; a watcher guards the process.
    Direct(u32),
    /// Pid not found in time; tracked by search descriptor without a watcher.
    Fallback,
}

/// The escalation tier that ended a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTier {
    Watcher,
    Terminate,
    ForceKill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub pid: u32,
    pub tier: StopTier,
}

#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub entry: ServerEntry,
    pub state: RunState,
    pub pid: Option<u32>,
}

pub struct ServerSupervisor {
    config: AppConfig,
    host: Arc<dyn ProcessHost>,
    launcher: Arc<dyn Launcher>,
    events: Arc<dyn EventSink>,
    run_state: RunStateStore,
    channel: CommandChannel,
    locator: ProcessLocator,
}

impl ServerSupervisor {
    pub fn new(
        config: AppConfig,
        host: Arc<dyn ProcessHost>,
        launcher: Arc<dyn Launcher>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            run_state: RunStateStore::new(&config.servers_dir, host.clone(), config.timings),
            channel: CommandChannel::new(&config.servers_dir),
            locator: ProcessLocator::new(host.clone(), config.timings),
            config,
            host,
            launcher,
            events,
        }
    }

    pub async fn start(&self, name: &str) -> Result<StartOutcome> {
        let entry = self.entry(name)?;
        if self.inspect(name).state.is_running() {
            return Err(CraftError::AlreadyRunning(name.to_string()).into());
        }

        let paths = self.config.server_paths(name);
        let plan = LaunchPlan::for_entry(&entry, &paths, &self.config.java_bin)?;

        transition(name, ServerPhase::Stopped, ServerPhase::Starting);
        self.channel.clear(name)?;
        self.launcher.launch(&plan)?;

        let outcome = match self.locator.locate(&plan.locate_query()).await {
            Some(pid) => {
                self.run_state.save(name, &RunState::RunningDirect(pid))?;
                if let Err(err) = self.launcher.spawn_watcher(name, pid, &paths) {
                    warn!("server {name} is running but its watcher failed to start: {err:#}");
                }
                StartOutcome::Direct(pid)
            }
            None => {
                self.run_state
                    .save(name, &RunState::RunningFallback(plan.descriptor()))?;
                warn!(
                    "could not capture the java pid for {name}; tracking it by directory, helper processes are not started"
                );
                StartOutcome::Fallback
            }
        };

        transition(name, ServerPhase::Starting, ServerPhase::Running);
        self.events.emit(LifecycleEvent::Started {
            server: name.to_string(),
            server_type: entry.server_type,
            port: entry.port,
            pid: match outcome {
                StartOutcome::Direct(pid) => Some(pid),
                StartOutcome::Fallback => None,
            },
        });
        Ok(outcome)
    }

    pub async fn stop(&self, name: &str) -> Result<StopOutcome> {
        self.entry(name)?;
        let resolved = self.inspect(name);
        let Some(pid) = resolved.pid else {
            return Err(CraftError::NotRunning(name.to_string()).into());
        };

        transition(name, ServerPhase::Running, ServerPhase::Stopping);
        let tier = self.escalate(name, pid, &resolved.state).await;

        let marker = self.run_state.clear(name);
        let command = self.channel.clear(name);
        marker.with_context(|| format!("failed to clear run state for {name}"))?;
        command.with_context(|| format!("failed to clear command file for {name}"))?;

        transition(name, ServerPhase::Stopping, ServerPhase::Stopped);
        info!("server {name} (pid {pid}) stopped via {tier:?}");
        self.events.emit(LifecycleEvent::Stopped {
            server: name.to_string(),
        });
        Ok(StopOutcome { pid, tier })
    }

    async fn escalate(&self, name: &str, pid: u32, state: &RunState) -> StopTier {
        let timings = self.config.timings;

        if matches!(state, RunState::RunningDirect(_)) {
            match self.channel.send(name, &ControlCommand::Stop) {
                Ok(()) => {
                    if self.wait_for_exit(pid, timings.graceful_polls).await {
                        return StopTier::Watcher;
                    }
                    warn!("watcher for {name} did not stop pid {pid} in time");
                }
                Err(err) => warn!("failed to signal watcher for {name}: {err:#}"),
            }
        }

        if let Err(err) = self.host.terminate(pid) {
            warn!("failed to request termination of pid {pid}: {err:#}");
        }
        if self.wait_for_exit(pid, timings.terminate_polls).await {
            return StopTier::Terminate;
        }

        warn!("pid {pid} ignored termination, force-killing process tree");
        if let Err(err) = self.host.kill_tree(pid) {
            warn!("failed to kill process tree of {pid}: {err:#}");
        }
        sleep(timings.force_kill_settle).await;
        StopTier::ForceKill
    }

    async fn wait_for_exit(&self, pid: u32, polls: u32) -> bool {
        for _ in 0..polls {
            sleep(self.config.timings.poll_interval).await;
            if !self.host.is_alive(pid) {
                return true;
            }
        }
        false
    }

    pub async fn restart(&self, name: &str) -> Result<StartOutcome> {
        match self.stop(name).await {
            Ok(_) => {}
            Err(err) if matches!(err.downcast_ref::<CraftError>(), Some(CraftError::NotRunning(_))) => {
                info!("server {name} was not running, starting it");
            }
            Err(err) => return Err(err),
        }

        sleep(self.config.timings.restart_delay).await;
        self.start(name).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.entry(name)?;

        let resolved = self.inspect(name);
        if let Some(pid) = resolved.pid {
            match self.stop(name).await {
                Ok(_) => {}
                Err(err) if matches!(err.downcast_ref::<CraftError>(), Some(CraftError::NotRunning(_))) => {}
                Err(err) => return Err(err),
            }
            self.ensure_dead(pid).await;
        }

        let paths = self.config.server_paths(name);
        remove_server_dir(&paths.dir)?;

        let mut registry = load_registry(&self.config.registry_path)?;
        registry.remove(name);
        save_registry(&self.config.registry_path, &registry)?;

        info!("server {name} deleted");
        self.events.emit(LifecycleEvent::Deleted {
            server: name.to_string(),
        });
        Ok(())
    }

    async fn ensure_dead(&self, pid: u32) {
        let interval = self.config.timings.poll_interval;
        let mut waited = std::time::Duration::ZERO;
        while waited < self.config.timings.delete_grace {
            if !self.host.is_alive(pid) {
                return;
            }
            sleep(interval).await;
            waited += interval;
        }

        if self.host.is_alive(pid) {
            warn!("pid {pid} survived stop, force-killing before delete");
            if let Err(err) = self.host.kill_tree(pid) {
                warn!("failed to kill process tree of {pid}: {err:#}");
            }
        }
    }

    pub fn status(&self, name: &str) -> Result<ServerStatus> {
        let entry = self.entry(name)?;
        let resolved = self.inspect(name);
        Ok(ServerStatus {
            entry,
            state: resolved.state,
            pid: resolved.pid,
        })
    }

    pub fn list(&self) -> Result<Vec<ServerStatus>> {
        let registry = load_registry(&self.config.registry_path)?;
        Ok(registry
            .servers
            .into_values()
            .map(|entry| {
                let resolved = self.inspect(&entry.name);
                ServerStatus {
                    entry,
                    state: resolved.state,
                    pid: resolved.pid,
                }
            })
            .collect())
    }

    fn entry(&self, name: &str) -> Result<ServerEntry> {
        let registry = load_registry(&self.config.registry_path)?;
        registry.get(name).cloned()
    }

    /// Loads the run state and reports a crash when the marker was stale.
    fn inspect(&self, name: &str) -> ResolvedState {
        let resolved = self.run_state.resolve(name);
        if resolved.stale {
            if let Err(err) = self.channel.clear(name) {
                warn!("failed to clear command file for {name}: {err:#}");
            }
            self.events.emit(LifecycleEvent::Crashed {
                server: name.to_string(),
            });
        }
        resolved
    }
}

fn transition(name: &str, from: ServerPhase, to: ServerPhase) {
    info!("server {name}: {from} -> {to}");
}

fn remove_server_dir(dir: &Path) -> Result<()> {
    let first_error = match fs::remove_dir_all(dir) {
        Ok(()) => return Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => err,
    };

    let doomed = deleting_sibling(dir);
    warn!(
        "failed to remove {} ({first_error}), moving it to {}",
        dir.display(),
        doomed.display()
    );
    fs::rename(dir, &doomed)
        .with_context(|| format!("failed to remove server directory {}", dir.display()))?;
    if let Err(err) = fs::remove_dir_all(&doomed) {
        warn!("left {} behind: {err}", doomed.display());
    }
    Ok(())
}

fn deleting_sibling(dir: &Path) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut name = dir
        .file_name()
        .map(|value| value.to_os_string())
        .unwrap_or_default();
    name.push(format!(".deleting-{nonce}"));
    dir.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{deleting_sibling, remove_server_dir, ServerSupervisor, StartOutcome, StopTier};
    use crate::config::AppConfig;
    use crate::errors::CraftError;
    use crate::events::LifecycleEvent;
    use crate::run_state::{RunState, RunStateStore};
    use crate::storage::load_registry;
    use crate::test_support::{
        provisioned_config, FakeHost, FakeLauncher, RecordingSink,
    };

    struct Harness {
        config: AppConfig,
        host: Arc<FakeHost>,
        launcher: Arc<FakeLauncher>,
        events: Arc<RecordingSink>,
        supervisor: ServerSupervisor,
    }

    impl Harness {
        fn new(prefix: &str, servers: &[&str]) -> Self {
            let config = provisioned_config(prefix, servers);
            let host = Arc::new(FakeHost::new());
            let launcher = Arc::new(FakeLauncher::new(host.clone(), config.clone()));
            let events = Arc::new(RecordingSink::default());
            let supervisor = ServerSupervisor::new(
                config.clone(),
                host.clone(),
                launcher.clone(),
                events.clone(),
            );
            Self {
                config,
                host,
                launcher,
                events,
                supervisor,
            }
        }

        fn marker_exists(&self, name: &str) -> bool {
            self.config.server_paths(name).marker.exists()
        }

        fn command_exists(&self, name: &str) -> bool {
            self.config.server_paths(name).command.exists()
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.config.base_dir);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn alpha_direct_start_then_watcher_driven_stop() {
        let harness = Harness::new("sup-alpha", &["alpha"]);

        let outcome = harness.supervisor.start("alpha").await.expect("start alpha");
        let StartOutcome::Direct(pid) = outcome else {
            panic!("expected a captured pid, got {outcome:?}");
        };
        assert!(harness.marker_exists("alpha"));
        assert_eq!(harness.launcher.watchers(), vec![("alpha".to_string(), pid)]);

        let status = harness.supervisor.status("alpha").expect("status");
        assert_eq!(status.state, RunState::RunningDirect(pid));
        assert!(status.state.is_running());

        let stopped = harness.supervisor.stop("alpha").await.expect("stop alpha");
        assert_eq!(stopped.tier, StopTier::Watcher);
        assert_eq!(harness.host.killed(), vec![pid]);
        assert!(harness.host.terminated().is_empty());
        assert!(!harness.marker_exists("alpha"));
        assert!(!harness.command_exists("alpha"));
        assert_eq!(
            harness.supervisor.status("alpha").expect("status").state,
            RunState::Stopped
        );

        let events = harness.events.events();
        assert!(matches!(events[0], LifecycleEvent::Started { pid: Some(p), .. } if p == pid));
        assert!(matches!(events[1], LifecycleEvent::Stopped { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn beta_fallback_tracking_stops_without_watcher() {
        let harness = Harness::new("sup-beta", &["beta"]);
        harness.launcher.hide_launched_processes();

        let outcome = harness.supervisor.start("beta").await.expect("start beta");
        assert_eq!(outcome, StartOutcome::Fallback);
        assert!(harness.launcher.watchers().is_empty());

        let marker = fs::read_to_string(harness.config.server_paths("beta").marker)
            .expect("fallback marker");
        assert!(marker.starts_with("SEARCH:"));

        // The java process becomes visible to the descriptor scan later on.
        let pid = harness.launcher.reveal_last_launch();
        let began = tokio::time::Instant::now();
        let stopped = harness.supervisor.stop("beta").await.expect("stop beta");
        let timings = harness.config.timings;
        assert!(
            began.elapsed() < timings.poll_interval * timings.graceful_polls,
            "fallback stop must not wait out the watcher window"
        );
        assert_eq!(stopped.pid, pid);
        assert_eq!(stopped.tier, StopTier::Terminate);
        assert_eq!(harness.host.terminated(), vec![pid]);
        assert!(!harness.command_exists("beta"));
        assert!(!harness.marker_exists("beta"));
        assert!(harness.host.killed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_is_rejected_and_spawns_nothing() {
        let harness = Harness::new("sup-twice", &["alpha"]);
        harness.supervisor.start("alpha").await.expect("first start");

        let err = harness
            .supervisor
            .start("alpha")
            .await
            .expect_err("second start should fail");
        assert!(matches!(
            err.downcast_ref::<CraftError>(),
            Some(CraftError::AlreadyRunning(name)) if name == "alpha"
        ));
        assert_eq!(harness.launcher.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_with_missing_jar_writes_no_marker() {
        let harness = Harness::new("sup-missing-jar", &["alpha"]);
        fs::remove_file(harness.config.server_paths("alpha").dir.join("server.jar"))
            .expect("remove jar");

        let err = harness
            .supervisor
            .start("alpha")
            .await
            .expect_err("start should fail");
        assert!(matches!(
            err.downcast_ref::<CraftError>(),
            Some(CraftError::LaunchFailure { .. })
        ));
        assert_eq!(harness.launcher.launch_count(), 0);
        assert!(!harness.marker_exists("alpha"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_escalates_to_force_kill_when_terminate_is_ignored() {
        let harness = Harness::new("sup-force", &["alpha"]);
        let StartOutcome::Direct(pid) = harness.supervisor.start("alpha").await.expect("start")
        else {
            panic!("expected direct tracking");
        };
        harness.launcher.disable_watchers();
        harness.host.ignore_terminate(pid);

        let stopped = harness.supervisor.stop("alpha").await.expect("stop");
        assert_eq!(stopped.tier, StopTier::ForceKill);
        assert_eq!(harness.host.terminated(), vec![pid]);
        assert_eq!(harness.host.killed(), vec![pid]);
        assert!(!harness.marker_exists("alpha"));
        assert!(!harness.command_exists("alpha"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_of_stopped_server_is_not_running() {
        let harness = Harness::new("sup-not-running", &["alpha"]);
        let err = harness
            .supervisor
            .stop("alpha")
            .await
            .expect_err("stop should fail");
        assert!(matches!(
            err.downcast_ref::<CraftError>(),
            Some(CraftError::NotRunning(name)) if name == "alpha"
        ));

        let err = harness
            .supervisor
            .stop("ghost")
            .await
            .expect_err("unknown server");
        assert!(matches!(
            err.downcast_ref::<CraftError>(),
            Some(CraftError::ServerNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_waits_between_stop_and_start() {
        let harness = Harness::new("sup-restart", &["alpha"]);
        harness.supervisor.start("alpha").await.expect("start");

        harness.supervisor.restart("alpha").await.expect("restart");

        let stopped_at = harness
            .events
            .recorded()
            .into_iter()
            .find(|(event, _)| matches!(event, LifecycleEvent::Stopped { .. }))
            .map(|(_, at)| at)
            .expect("stop event");
        let launches = harness.launcher.launch_times();
        assert_eq!(launches.len(), 2);
        assert!(launches[1].duration_since(stopped_at) >= Duration::from_secs(5));
        assert!(harness.marker_exists("alpha"));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_of_stopped_server_just_starts() {
        let harness = Harness::new("sup-restart-cold", &["alpha"]);
        let outcome = harness.supervisor.restart("alpha").await.expect("restart");
        assert!(matches!(outcome, StartOutcome::Direct(_)));
        assert_eq!(harness.launcher.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_force_kills_survivor_and_removes_everything() {
        let harness = Harness::new("sup-delete", &["gamma", "alpha"]);
        let StartOutcome::Direct(pid) = harness.supervisor.start("gamma").await.expect("start")
        else {
            panic!("expected direct tracking");
        };
        harness.launcher.disable_watchers();
        harness.host.ignore_terminate(pid);
        harness.host.resist_kills(pid, 1);

        let started = tokio::time::Instant::now();
        harness.supervisor.delete("gamma").await.expect("delete");

        assert!(started.elapsed() >= Duration::from_secs(15));
        assert_eq!(harness.host.killed(), vec![pid, pid]);
        assert!(!harness.host.is_running(pid));
        assert!(!harness.config.server_paths("gamma").dir.exists());

        let registry = load_registry(&harness.config.registry_path).expect("registry");
        assert!(!registry.contains("gamma"));
        assert!(registry.contains("alpha"));
        assert!(matches!(
            harness.events.events().last(),
            Some(LifecycleEvent::Deleted { server }) if server == "gamma"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_of_unknown_server_is_not_found() {
        let harness = Harness::new("sup-delete-ghost", &["alpha"]);
        let err = harness
            .supervisor
            .delete("ghost")
            .await
            .expect_err("unknown server");
        assert!(matches!(
            err.downcast_ref::<CraftError>(),
            Some(CraftError::ServerNotFound(name)) if name == "ghost"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_marker_is_reported_as_crash() {
        let harness = Harness::new("sup-crash", &["alpha"]);
        RunStateStore::new(
            &harness.config.servers_dir,
            harness.host.clone(),
            harness.config.timings,
        )
        .save("alpha", &RunState::RunningDirect(4040))
        .expect("seed stale marker");

        let statuses = harness.supervisor.list().expect("list");
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, RunState::Stopped);
        assert!(!harness.marker_exists("alpha"));
        assert!(matches!(
            harness.events.events().as_slice(),
            [LifecycleEvent::Crashed { server }] if server == "alpha"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn undeletable_directory_is_moved_aside() {
        use std::os::unix::fs::PermissionsExt;

        let base = crate::test_support::temp_dir("sup-move-aside");
        let dir = base.join("gamma");
        let locked = dir.join("world");
        fs::create_dir_all(&locked).expect("create world dir");
        fs::write(locked.join("level.dat"), b"level").expect("seed world file");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).expect("lock world dir");

        // Privileged users ignore directory permissions, so the first removal
        // would simply succeed.
        if fs::write(locked.join("write-check"), b"").is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o700)).expect("unlock");
            let _ = fs::remove_dir_all(base);
            return;
        }

        remove_server_dir(&dir).expect("directory should be moved aside");
        assert!(!dir.exists());

        let leftovers: Vec<_> = fs::read_dir(&base)
            .expect("read base dir")
            .flatten()
            .map(|entry| entry.path())
            .collect();
        assert_eq!(leftovers.len(), 1);
        let moved = &leftovers[0];
        assert!(moved
            .file_name()
            .and_then(|value| value.to_str())
            .expect("file name")
            .starts_with("gamma.deleting-"));
        assert!(moved.join("world").join("level.dat").exists());

        fs::set_permissions(moved.join("world"), fs::Permissions::from_mode(0o700))
            .expect("unlock moved world dir");
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn deleting_sibling_stays_next_to_directory() {
        let sibling = deleting_sibling(std::path::Path::new("/srv/servers/gamma"));
        assert_eq!(sibling.parent(), Some(std::path::Path::new("/srv/servers")));
        assert!(sibling
            .file_name()
            .and_then(|value| value.to_str())
            .expect("file name")
            .starts_with("gamma.deleting-"));
    }
}

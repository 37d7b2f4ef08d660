//! In-memory process table, launcher and event sink for lifecycle tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{AppConfig, ServerPaths};
use crate::control::ProcessHost;
use crate::events::{EventSink, LifecycleEvent};
use crate::launch::{LaunchPlan, Launcher};
use crate::locator::ProcessSnapshot;
use crate::server::{Difficulty, ServerEntry, ServerType};
use crate::storage::{save_registry, ServerRegistry};
use crate::watcher::Watcher;

pub fn temp_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock failure")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("craftmgr-{prefix}-{nonce}"));
    fs::create_dir_all(&dir).expect("failed to create temp dir");
    dir
}

pub fn sample_entry(name: &str) -> ServerEntry {
    ServerEntry {
        name: name.to_string(),
        jar: "server.jar".to_string(),
        ram: "2G".to_string(),
        port: 25565,
        server_type: ServerType::Paper,
        version: Some("1.21.4".to_string()),
        description: String::new(),
        render_distance: 10,
        difficulty: Difficulty::Normal,
        hardcore: false,
    }
}

/// A config rooted in a fresh temp dir with `servers` registered and their
/// jars on disk.
pub fn provisioned_config(prefix: &str, servers: &[&str]) -> AppConfig {
    let config = AppConfig::with_base_dir(temp_dir(prefix));
    config.ensure_layout().expect("failed to create layout");

    let mut registry = ServerRegistry::default();
    for (offset, name) in servers.iter().enumerate() {
        let paths = config.server_paths(name);
        fs::create_dir_all(&paths.dir).expect("failed to create server dir");
        fs::write(paths.dir.join("server.jar"), b"jar").expect("failed to seed jar");

        let mut entry = sample_entry(name);
        entry.port = 25565 + offset as u16;
        registry.insert(entry);
    }
    save_registry(&config.registry_path, &registry).expect("failed to save registry");
    config
}

#[derive(Default)]
struct HostState {
    processes: BTreeMap<u32, ProcessSnapshot>,
    scans: usize,
    terminated: Vec<u32>,
    killed: Vec<u32>,
    ignore_terminate: HashSet<u32>,
    kill_resistance: HashMap<u32, u32>,
    fail_kills: bool,
}

#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut HostState) -> T) -> T {
        let mut state = self.state.lock().expect("fake host lock poisoned");
        f(&mut state)
    }

    pub fn add_java(&self, pid: u32, cmdline: &str, cwd: Option<&str>) {
        self.add_process(ProcessSnapshot {
            pid,
            cmdline: cmdline.to_string(),
            cwd: cwd.map(PathBuf::from),
        });
    }

    pub fn add_process(&self, snapshot: ProcessSnapshot) {
        self.with_state(|state| {
            state.processes.insert(snapshot.pid, snapshot);
        });
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.with_state(|state| state.processes.contains_key(&pid))
    }

    pub fn scan_count(&self) -> usize {
        self.with_state(|state| state.scans)
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.with_state(|state| state.terminated.clone())
    }

    pub fn killed(&self) -> Vec<u32> {
        self.with_state(|state| state.killed.clone())
    }

    pub fn ignore_terminate(&self, pid: u32) {
        self.with_state(|state| {
            state.ignore_terminate.insert(pid);
        });
    }

    /// The next `count` kill attempts against `pid` leave it running.
    pub fn resist_kills(&self, pid: u32, count: u32) {
        self.with_state(|state| {
            state.kill_resistance.insert(pid, count);
        });
    }

    pub fn fail_kills(&self) {
        self.with_state(|state| state.fail_kills = true);
    }
}

impl ProcessHost for FakeHost {
    fn java_processes(&self) -> Vec<ProcessSnapshot> {
        self.with_state(|state| {
            state.scans += 1;
            state.processes.values().cloned().collect()
        })
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.is_running(pid)
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        self.with_state(|state| {
            state.terminated.push(pid);
            if !state.ignore_terminate.contains(&pid) {
                state.processes.remove(&pid);
            }
        });
        Ok(())
    }

    fn kill_tree(&self, pid: u32) -> Result<()> {
        self.with_state(|state| {
            state.killed.push(pid);
            if state.fail_kills {
                anyhow::bail!("permission denied killing {pid}");
            }
            match state.kill_resistance.get_mut(&pid) {
                Some(remaining) if *remaining > 0 => *remaining -= 1,
                _ => {
                    state.processes.remove(&pid);
                }
            }
            Ok(())
        })
    }
}

struct LauncherState {
    next_pid: u32,
    launches: Vec<Instant>,
    watchers: Vec<(String, u32)>,
    tasks: Vec<JoinHandle<()>>,
    hide_processes: bool,
    hidden: Vec<ProcessSnapshot>,
    watchers_enabled: bool,
}

/// Records launches and makes each one show up as a java process in the fake
/// host. Watchers run as real [`Watcher`]s on tokio tasks.
pub struct FakeLauncher {
    host: Arc<FakeHost>,
    config: AppConfig,
    state: Mutex<LauncherState>,
}

impl FakeLauncher {
    pub fn new(host: Arc<FakeHost>, config: AppConfig) -> Self {
        Self {
            host,
            config,
            state: Mutex::new(LauncherState {
                next_pid: 5000,
                launches: Vec::new(),
                watchers: Vec::new(),
                tasks: Vec::new(),
                hide_processes: false,
                hidden: Vec::new(),
                watchers_enabled: true,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut LauncherState) -> T) -> T {
        let mut state = self.state.lock().expect("fake launcher lock poisoned");
        f(&mut state)
    }

    /// Launched processes stay invisible to scans until revealed.
    pub fn hide_launched_processes(&self) {
        self.with_state(|state| state.hide_processes = true);
    }

    pub fn reveal_last_launch(&self) -> u32 {
        let snapshot = self
            .with_state(|state| state.hidden.pop())
            .expect("no hidden launch to reveal");
        let pid = snapshot.pid;
        self.host.add_process(snapshot);
        pid
    }

    /// Stops running watcher tasks and skips future ones.
    pub fn disable_watchers(&self) {
        self.with_state(|state| {
            state.watchers_enabled = false;
            for task in state.tasks.drain(..) {
                task.abort();
            }
        });
    }

    pub fn launch_count(&self) -> usize {
        self.with_state(|state| state.launches.len())
    }

    pub fn launch_times(&self) -> Vec<Instant> {
        self.with_state(|state| state.launches.clone())
    }

    pub fn watchers(&self) -> Vec<(String, u32)> {
        self.with_state(|state| state.watchers.clone())
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, plan: &LaunchPlan) -> Result<()> {
        self.with_state(|state| {
            let pid = state.next_pid;
            state.next_pid += 1;
            state.launches.push(Instant::now());

            let snapshot = ProcessSnapshot {
                pid,
                cmdline: plan.shell_line(),
                cwd: Some(plan.working_dir.clone()),
            };
            if state.hide_processes {
                state.hidden.push(snapshot);
            } else {
                self.host.add_process(snapshot);
            }
        });
        Ok(())
    }

    fn spawn_watcher(&self, server: &str, pid: u32, _paths: &ServerPaths) -> Result<()> {
        self.with_state(|state| {
            state.watchers.push((server.to_string(), pid));
            if !state.watchers_enabled {
                return;
            }

            let host: Arc<dyn ProcessHost> = self.host.clone();
            let mut watcher = Watcher::new(
                server,
                pid,
                &self.config.servers_dir,
                host,
                self.config.timings,
            );
            state.tasks.push(tokio::spawn(async move {
                watcher.run().await;
            }));
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(LifecycleEvent, Instant)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.recorded().into_iter().map(|(event, _)| event).collect()
    }

    pub fn recorded(&self) -> Vec<(LifecycleEvent, Instant)> {
        self.events
            .lock()
            .expect("recording sink lock poisoned")
            .clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .expect("recording sink lock poisoned")
            .push((event, Instant::now()));
    }
}

pub fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create parent dir");
    }
    fs::write(path, contents).expect("failed to write file");
}

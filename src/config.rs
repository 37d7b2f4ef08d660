use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::logging::LogRotationPolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_dir: PathBuf,
    pub data_dir: PathBuf,
    pub registry_path: PathBuf,
    pub servers_dir: PathBuf,
    pub java_bin: String,
    pub terminal: Option<String>,
    pub log_rotation: LogRotationPolicy,
    pub discord_webhook: Option<String>,
    pub notifications_enabled: bool,
    pub timings: LifecycleTimings,
}

/// Poll counts and delays used by start/stop/restart/delete and the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimings {
    pub locate_attempts: u32,
    pub locate_settle: Duration,
    pub locate_retry: Duration,
    pub watcher_poll: Duration,
    pub watcher_heartbeat_every: u32,
    pub watcher_kill_settle: Duration,
    pub graceful_polls: u32,
    pub terminate_polls: u32,
    pub poll_interval: Duration,
    pub force_kill_settle: Duration,
    pub restart_delay: Duration,
    pub delete_grace: Duration,
    pub monitor_interval: Duration,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self {
            locate_attempts: 5,
            locate_settle: Duration::from_secs(3),
            locate_retry: Duration::from_secs(2),
            watcher_poll: Duration::from_millis(500),
            watcher_heartbeat_every: 20,
            watcher_kill_settle: Duration::from_secs(2),
            graceful_polls: 10,
            terminate_polls: 5,
            poll_interval: Duration::from_secs(1),
            force_kill_settle: Duration::from_secs(2),
            // Old file handles on the jar and world locks may linger after exit.
            restart_delay: Duration::from_secs(5),
            delete_grace: Duration::from_secs(15),
            monitor_interval: Duration::from_secs(2),
        }
    }
}

/// Files the supervisor and watcher share for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPaths {
    pub dir: PathBuf,
    pub marker: PathBuf,
    pub command: PathBuf,
    pub log_dir: PathBuf,
    pub console_log: PathBuf,
    pub watcher_log: PathBuf,
}

impl ServerPaths {
    pub fn new(servers_dir: &Path, name: &str) -> Self {
        let dir = servers_dir.join(name);
        let log_dir = dir.join("logs");
        Self {
            marker: dir.join("running.txt"),
            command: dir.join("command.txt"),
            console_log: log_dir.join("console.log"),
            watcher_log: log_dir.join("watcher.log"),
            log_dir,
            dir,
        }
    }

    /// Absolute form of the server directory, as a running java process reports it.
    pub fn absolute_dir(&self) -> PathBuf {
        fs::canonicalize(&self.dir).unwrap_or_else(|_| {
            if self.dir.is_absolute() {
                self.dir.clone()
            } else {
                env::current_dir()
                    .map(|cwd| cwd.join(&self.dir))
                    .unwrap_or_else(|_| self.dir.clone())
            }
        })
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let base_dir = env::var("CRAFTMGR_HOME")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(env::temp_dir)
                    .join("craftmgr")
            });
        let java_bin = env_string("CRAFTMGR_JAVA").unwrap_or_else(|| "java".to_string());
        let terminal = env_string("CRAFTMGR_TERMINAL");
        let discord_webhook = env_string("CRAFTMGR_DISCORD_WEBHOOK");
        let notifications_enabled = env_string("CRAFTMGR_NOTIFICATIONS")
            .map(|value| !matches!(value.to_ascii_lowercase().as_str(), "0" | "false" | "off"))
            .unwrap_or(true);
        let log_rotation = LogRotationPolicy {
            max_size_bytes: env_u64("CRAFTMGR_LOG_MAX_SIZE_MB", 20)
                .max(1)
                .saturating_mul(1024 * 1024),
            max_files: env_u64("CRAFTMGR_LOG_MAX_FILES", 5).max(1) as u32,
            max_age_days: env_u64("CRAFTMGR_LOG_MAX_DAYS", 14).max(1),
        };

        let config = Self::with_base_dir(base_dir);
        let config = Self {
            java_bin,
            terminal,
            log_rotation,
            discord_webhook,
            notifications_enabled,
            ..config
        };
        config.ensure_layout()?;
        Ok(config)
    }

    /// Layout rooted at `base_dir` with default settings.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        let data_dir = base_dir.join("data");
        Self {
            registry_path: data_dir.join("servers.json"),
            servers_dir: base_dir.join("servers"),
            data_dir,
            base_dir,
            java_bin: "java".to_string(),
            terminal: None,
            log_rotation: LogRotationPolicy {
                max_size_bytes: 20 * 1024 * 1024,
                max_files: 5,
                max_age_days: 14,
            },
            discord_webhook: None,
            notifications_enabled: true,
            timings: LifecycleTimings::default(),
        }
    }

    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [&self.base_dir, &self.data_dir, &self.servers_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn server_paths(&self, name: &str) -> ServerPaths {
        ServerPaths::new(&self.servers_dir, name)
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

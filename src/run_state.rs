//! The `running.txt` marker: the only record of whether a server is running.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{LifecycleTimings, ServerPaths};
use crate::control::ProcessHost;
use crate::locator::{LocateQuery, ProcessLocator, SignalSet};
use crate::storage::{remove_if_exists, write_atomic};

const SEARCH_PREFIX: &str = "SEARCH:";

/// Enough to find a server's java process again when its pid was never captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackDescriptor {
    pub name: String,
    #[serde(rename = "jar")]
    pub jar_filename: String,
    #[serde(rename = "dir")]
    pub working_dir: PathBuf,
}

impl FallbackDescriptor {
    fn to_query(&self) -> LocateQuery {
        LocateQuery {
            server_name: self.name.clone(),
            jar_filename: self.jar_filename.clone(),
            working_dir: self.working_dir.clone(),
            is_forge: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    RunningDirect(u32),
    RunningFallback(FallbackDescriptor),
}

impl RunState {
    pub fn is_running(&self) -> bool {
        !matches!(self, RunState::Stopped)
    }
}

/// Result of reading a marker and checking it against the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedState {
    pub state: RunState,
    /// Live pid behind the state, when one could be found.
    pub pid: Option<u32>,
    /// The marker pointed at a dead process and was removed.
    pub stale: bool,
}

impl ResolvedState {
    fn stopped(stale: bool) -> Self {
        Self {
            state: RunState::Stopped,
            pid: None,
            stale,
        }
    }
}

pub fn encode_marker(state: &RunState) -> Result<Option<String>> {
    match state {
        RunState::Stopped => Ok(None),
        RunState::RunningDirect(pid) => Ok(Some(pid.to_string())),
        RunState::RunningFallback(descriptor) => Ok(Some(format!(
            "{SEARCH_PREFIX}{}",
            serde_json::to_string(descriptor)?
        ))),
    }
}

/// Parses marker text. Returns `None` for anything unrecognisable.
pub fn decode_marker(raw: &str) -> Option<RunState> {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix(SEARCH_PREFIX) {
        return decode_descriptor(rest).map(RunState::RunningFallback);
    }

    match trimmed.parse::<u32>() {
        Ok(pid) if pid > 0 => Some(RunState::RunningDirect(pid)),
        _ => None,
    }
}

fn decode_descriptor(rest: &str) -> Option<FallbackDescriptor> {
    if rest.starts_with('{') {
        return serde_json::from_str(rest).ok();
    }

    // Legacy `name:jar:dir`; the directory keeps any further colons.
    let mut parts = rest.splitn(3, ':');
    let name = parts.next()?.trim();
    let jar = parts.next()?.trim();
    let dir = parts.next()?.trim();
    if name.is_empty() || jar.is_empty() || dir.is_empty() {
        return None;
    }
    Some(FallbackDescriptor {
        name: name.to_string(),
        jar_filename: jar.to_string(),
        working_dir: PathBuf::from(dir),
    })
}

pub struct RunStateStore {
    servers_dir: PathBuf,
    host: Arc<dyn ProcessHost>,
    locator: ProcessLocator,
}

impl RunStateStore {
    pub fn new(servers_dir: &Path, host: Arc<dyn ProcessHost>, timings: LifecycleTimings) -> Self {
        Self {
            servers_dir: servers_dir.to_path_buf(),
            locator: ProcessLocator::new(host.clone(), timings),
            host,
        }
    }

    fn marker_path(&self, name: &str) -> PathBuf {
        ServerPaths::new(&self.servers_dir, name).marker
    }

    pub fn save(&self, name: &str, state: &RunState) -> Result<()> {
        let path = self.marker_path(name);
        match encode_marker(state)? {
            Some(contents) => write_atomic(&path, contents.as_bytes())
                .with_context(|| format!("failed to persist run state for {name}")),
            None => self.clear(name),
        }
    }

    pub fn load(&self, name: &str) -> RunState {
        self.resolve(name).state
    }

    /// Reads the marker and re-validates it. Markers for dead processes are
    /// removed; unreadable ones are reported as stopped and left for the next
    /// writer to replace.
    pub fn resolve(&self, name: &str) -> ResolvedState {
        let path = self.marker_path(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return ResolvedState::stopped(false)
            }
            Err(err) => {
                warn!("failed to read run state {}: {err}", path.display());
                return ResolvedState::stopped(false);
            }
        };

        let Some(state) = decode_marker(&raw) else {
            warn!(
                "run state {} is corrupt ({:?}), treating {name} as stopped",
                path.display(),
                raw.trim()
            );
            return ResolvedState::stopped(false);
        };

        let pid = match &state {
            RunState::Stopped => None,
            RunState::RunningDirect(pid) => self.host.is_alive(*pid).then_some(*pid),
            RunState::RunningFallback(descriptor) => self
                .locator
                .scan(&descriptor.to_query(), SignalSet::Descriptor),
        };

        if pid.is_none() {
            debug!("run state for {name} refers to a process that is gone, clearing it");
            if let Err(err) = self.clear(name) {
                warn!("failed to clear stale run state for {name}: {err:#}");
            }
            return ResolvedState::stopped(true);
        }

        ResolvedState { state, pid, stale: false }
    }

    pub fn clear(&self, name: &str) -> Result<()> {
        remove_if_exists(&self.marker_path(name))?;
        Ok(())
    }
}

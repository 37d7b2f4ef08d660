//! Finds the java process behind a freshly launched server.
//!
//! Servers are started through a shell wrapper, so the launcher never holds
//! the java child directly. The locator scans the process table and matches
//! candidates by command line and working directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::LifecycleTimings;
use crate::control::ProcessHost;

/// What the process table reports about one java process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub cmdline: String,
    /// `None` when the working directory could not be read.
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateQuery {
    pub server_name: String,
    pub jar_filename: String,
    pub working_dir: PathBuf,
    pub is_forge: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSignal {
    JarInCommandLine,
    WorkingDirectory,
    ForgeLibraries,
    HeadlessFlag,
}

impl MatchSignal {
    fn is_strong(self) -> bool {
        !matches!(self, MatchSignal::JarInCommandLine)
    }
}

/// Which signals a scan may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSet {
    /// All four signals, used right after launch.
    Full,
    /// Jar filename and working directory only, used to re-identify a
    /// fallback-tracked server.
    Descriptor,
}

const HEADLESS_FLAG: &str = "nogui";

pub fn is_java_executable(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    matches!(
        lowered.as_str(),
        "java" | "javaw" | "java.exe" | "javaw.exe"
    )
}

/// Evaluates one process against the query.
///
/// A process whose working directory is known and differs from the server's
/// never matches, even when the jar filename is identical.
pub fn match_signal(
    process: &ProcessSnapshot,
    query: &LocateQuery,
    signals: SignalSet,
) -> Option<MatchSignal> {
    let cmdline = process.cmdline.to_lowercase();
    let jar = query.jar_filename.to_lowercase();
    let jar_hit = !jar.is_empty() && cmdline.contains(&jar);

    let Some(cwd) = process.cwd.as_deref() else {
        return jar_hit.then_some(MatchSignal::JarInCommandLine);
    };
    if !same_directory(cwd, &query.working_dir) {
        return None;
    }

    if jar_hit {
        return Some(MatchSignal::WorkingDirectory);
    }
    if signals == SignalSet::Descriptor {
        return Some(MatchSignal::WorkingDirectory);
    }
    if query.is_forge && cmdline.contains("libraries") {
        return Some(MatchSignal::ForgeLibraries);
    }
    if cmdline.contains(HEADLESS_FLAG) {
        return Some(MatchSignal::HeadlessFlag);
    }
    Some(MatchSignal::WorkingDirectory)
}

/// Case-insensitive path comparison that respects component boundaries, so
/// `/srv/alpha` never matches `/srv/alpha2`.
pub fn same_directory(reported: &Path, expected: &Path) -> bool {
    normalize(reported) == normalize(expected)
}

fn normalize(path: &Path) -> String {
    let mut value = path.to_string_lossy().replace('\\', "/").to_lowercase();
    while value.len() > 1 && value.ends_with('/') {
        value.pop();
    }
    value
}

pub struct ProcessLocator {
    host: Arc<dyn ProcessHost>,
    timings: LifecycleTimings,
}

impl ProcessLocator {
    pub fn new(host: Arc<dyn ProcessHost>, timings: LifecycleTimings) -> Self {
        Self { host, timings }
    }

    /// Polls the process table until the server's java process shows up.
    pub async fn locate(&self, query: &LocateQuery) -> Option<u32> {
        sleep(self.timings.locate_settle).await;

        let attempts = self.timings.locate_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(pid) = self.scan(query, SignalSet::Full) {
                info!(
                    "located java process {pid} for server {} on attempt {attempt}",
                    query.server_name
                );
                return Some(pid);
            }
            debug!(
                "no java process for server {} yet (attempt {attempt}/{attempts})",
                query.server_name
            );
            if attempt < attempts {
                sleep(self.timings.locate_retry).await;
            }
        }

        None
    }

    /// Single read-only pass over the process table.
    ///
    /// Strong matches win over weak ones. A weak (jar-only) match is accepted
    /// only when it is the sole candidate.
    pub fn scan(&self, query: &LocateQuery, signals: SignalSet) -> Option<u32> {
        let mut weak = Vec::new();
        for process in self.host.java_processes() {
            match match_signal(&process, query, signals) {
                Some(signal) if signal.is_strong() => {
                    debug!(
                        "pid {} matched server {} via {signal:?}",
                        process.pid, query.server_name
                    );
                    return Some(process.pid);
                }
                Some(_) => weak.push(process.pid),
                None => {}
            }
        }

        match weak.as_slice() {
            [pid] => Some(*pid),
            _ => None,
        }
    }
}

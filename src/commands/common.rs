use std::sync::Arc;

use crate::config::AppConfig;
use crate::control::SystemProcesses;
use crate::events::sink_from_config;
use crate::launch::ShellLauncher;
use crate::run_state::RunState;
use crate::supervisor::ServerSupervisor;

pub(crate) fn supervisor(config: &AppConfig) -> ServerSupervisor {
    ServerSupervisor::new(
        config.clone(),
        Arc::new(SystemProcesses),
        Arc::new(ShellLauncher::new(config)),
        sink_from_config(config),
    )
}

pub(crate) fn describe_state(state: &RunState, pid: Option<u32>) -> String {
    match (state, pid) {
        (RunState::Stopped, _) => "stopped".to_string(),
        (RunState::RunningDirect(pid), _) => format!("running (pid {pid})"),
        (RunState::RunningFallback(_), Some(pid)) => format!("running (pid {pid}, untracked)"),
        (RunState::RunningFallback(_), None) => "running (untracked)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::describe_state;
    use crate::run_state::{FallbackDescriptor, RunState};

    #[test]
    fn describe_state_mentions_pid_when_known() {
        assert_eq!(describe_state(&RunState::Stopped, None), "stopped");
        assert_eq!(
            describe_state(&RunState::RunningDirect(42), Some(42)),
            "running (pid 42)"
        );

        let fallback = RunState::RunningFallback(FallbackDescriptor {
            name: "beta".to_string(),
            jar_filename: "server.jar".to_string(),
            working_dir: PathBuf::from("/srv/beta"),
        });
        assert_eq!(
            describe_state(&fallback, Some(7)),
            "running (pid 7, untracked)"
        );
    }
}

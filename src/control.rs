use std::collections::HashMap;

use anyhow::Result;
use sysinfo::{Pid as SysPid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
#[cfg(unix)]
use tracing::warn;

use crate::locator::{is_java_executable, ProcessSnapshot};

/// OS process access used by the locator, the supervisor and the watcher.
pub trait ProcessHost: Send + Sync {
    /// Every process whose executable is a java runtime. Processes that cannot
    /// be inspected are left out rather than failing the scan.
    fn java_processes(&self) -> Vec<ProcessSnapshot>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Asks the process to shut down (SIGTERM / `taskkill /T`).
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Forcefully kills the process and all of its descendants.
    fn kill_tree(&self, pid: u32) -> Result<()>;
}

/// The real process table, read through sysinfo and signalled through nix.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

impl ProcessHost for SystemProcesses {
    fn java_processes(&self) -> Vec<ProcessSnapshot> {
        let mut system = System::new();
        let refresh = ProcessRefreshKind::nothing()
            .with_cmd(UpdateKind::Always)
            .with_cwd(UpdateKind::Always)
            .with_exe(UpdateKind::OnlyIfNotSet);
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);

        let mut found: Vec<ProcessSnapshot> = system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter(|(_, process)| {
                is_java_executable(&process.name().to_string_lossy())
                    || process
                        .exe()
                        .and_then(|exe| exe.file_name())
                        .map(|name| is_java_executable(&name.to_string_lossy()))
                        .unwrap_or(false)
            })
            .map(|(pid, process)| ProcessSnapshot {
                pid: pid.as_u32(),
                cmdline: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(" "),
                cwd: process.cwd().map(|cwd| cwd.to_path_buf()),
            })
            .collect();
        found.sort_by_key(|process| process.pid);
        found
    }

    fn is_alive(&self, pid: u32) -> bool {
        process_exists(pid) && !is_zombie(pid)
    }

    #[cfg(unix)]
    fn terminate(&self, pid: u32) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};

        let Some(target) = signal_target(pid) else {
            return Ok(());
        };
        match kill(target, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(anyhow::anyhow!("failed to send SIGTERM to {pid}: {err}")),
        }
    }

    #[cfg(windows)]
    fn terminate(&self, pid: u32) -> Result<()> {
        taskkill(pid, false)
    }

    #[cfg(not(any(unix, windows)))]
    fn terminate(&self, _pid: u32) -> Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn kill_tree(&self, pid: u32) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};

        let Some(target) = signal_target(pid) else {
            return Ok(());
        };
        for child in descendants_deepest_first(pid) {
            let Some(child_target) = signal_target(child) else {
                continue;
            };
            match kill(child_target, Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(err) => warn!("failed to kill descendant {child} of {pid}: {err}"),
            }
        }

        match kill(target, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(anyhow::anyhow!("failed to send SIGKILL to {pid}: {err}")),
        }
    }

    #[cfg(windows)]
    fn kill_tree(&self, pid: u32) -> Result<()> {
        taskkill(pid, true)
    }

    #[cfg(not(any(unix, windows)))]
    fn kill_tree(&self, _pid: u32) -> Result<()> {
        Ok(())
    }
}

/// Pid `0` and values past `i32::MAX` address process groups or every
/// process in `kill(2)`, so they never name a single process.
#[cfg(unix)]
fn signal_target(pid: u32) -> Option<nix::unistd::Pid> {
    i32::try_from(pid)
        .ok()
        .filter(|raw| *raw > 0)
        .map(nix::unistd::Pid::from_raw)
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};

    let Some(target) = signal_target(pid) else {
        return false;
    };
    match kill(target, None::<Signal>) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_exists(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[SysPid::from_u32(pid)]), true);
    system.process(SysPid::from_u32(pid)).is_some()
}

/// Exited children that nobody reaped yet still answer signal 0.
fn is_zombie(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[SysPid::from_u32(pid)]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system
        .process(SysPid::from_u32(pid))
        .map(|process| process.status() == sysinfo::ProcessStatus::Zombie)
        .unwrap_or(false)
}

#[cfg(unix)]
fn descendants_deepest_first(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing());

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(pid.as_u32());
        }
    }

    collect_descendants(root, &children)
}

fn collect_descendants(root: u32, children: &HashMap<u32, Vec<u32>>) -> Vec<u32> {
    let mut ordered = Vec::new();
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
        if let Some(direct) = children.get(&current) {
            for child in direct {
                if *child != root && !ordered.contains(child) {
                    ordered.push(*child);
                    stack.push(*child);
                }
            }
        }
    }
    ordered.reverse();
    ordered
}

#[cfg(windows)]
fn taskkill(pid: u32, force: bool) -> Result<()> {
    use std::process::{Command, Stdio};

    use anyhow::Context;

    if pid == 0 || !process_exists(pid) {
        return Ok(());
    }

    let pid_string = pid.to_string();
    let mut command = Command::new("taskkill");
    command.args(["/PID", &pid_string, "/T"]);
    if force {
        command.arg("/F");
    }
    let status = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("failed to run taskkill")?;

    if !status.success() && process_exists(pid) && force {
        anyhow::bail!("failed to force-kill process {pid} with taskkill");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{collect_descendants, ProcessHost, SystemProcesses};

    #[test]
    fn descendants_are_returned_deepest_first() {
        let mut children = HashMap::new();
        children.insert(1, vec![2, 3]);
        children.insert(2, vec![4]);
        children.insert(4, vec![5]);

        let ordered = collect_descendants(1, &children);
        assert_eq!(ordered.len(), 4);
        let position = |pid: u32| {
            ordered
                .iter()
                .position(|candidate| *candidate == pid)
                .expect("descendant should be listed")
        };
        assert!(position(5) < position(4));
        assert!(position(4) < position(2));
        assert!(!ordered.contains(&1));
    }

    #[test]
    fn current_process_is_alive() {
        assert!(SystemProcesses.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn kill_tree_on_exited_process_is_success() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("failed to spawn helper");
        let pid = child.id();
        child.wait().expect("failed to wait for helper");

        assert!(!SystemProcesses.is_alive(pid));
        SystemProcesses
            .kill_tree(pid)
            .expect("killing a gone process should succeed");
        SystemProcesses
            .terminate(pid)
            .expect("terminating a gone process should succeed");
    }

    #[cfg(unix)]
    #[test]
    fn terminate_ignores_pids_that_address_groups() {
        for pid in [0, u32::MAX, i32::MAX as u32 + 1] {
            SystemProcesses
                .terminate(pid)
                .expect("group-addressing pid should be a no-op");
        }
        assert!(SystemProcesses.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn kill_tree_ignores_pids_that_address_groups() {
        for pid in [0, u32::MAX, i32::MAX as u32 + 1] {
            SystemProcesses
                .kill_tree(pid)
                .expect("group-addressing pid should be a no-op");
            assert!(!SystemProcesses.is_alive(pid));
        }
        assert!(SystemProcesses.is_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn kill_tree_stops_a_running_child() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("failed to spawn sleep");
        let pid = child.id();
        assert!(SystemProcesses.is_alive(pid));

        SystemProcesses.kill_tree(pid).expect("kill should succeed");
        let status = child.wait().expect("failed to reap sleep");
        assert!(!status.success());
        assert!(!SystemProcesses.is_alive(pid));
    }
}

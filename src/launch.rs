use std::env;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, ServerPaths};
use crate::errors::CraftError;
use crate::locator::LocateQuery;
use crate::logging::{open_log_writer, LogRotationPolicy};
use crate::run_state::FallbackDescriptor;
use crate::server::ServerEntry;

const HEADLESS_FLAG: &str = "nogui";

/// Everything needed to start one server and find it again afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub server: String,
    pub working_dir: PathBuf,
    pub program: String,
    pub args: Vec<String>,
    pub jar_filename: String,
    pub is_forge: bool,
    pub console_log: PathBuf,
}

impl LaunchPlan {
    /// Builds the java invocation for `entry`. Forge servers provisioned with
    /// a launcher script run that script instead of `java -jar`.
    pub fn for_entry(entry: &ServerEntry, paths: &ServerPaths, java_bin: &str) -> Result<Self> {
        let jar_path = paths.dir.join(&entry.jar);
        if !jar_path.is_file() {
            return Err(CraftError::launch_failure(
                &entry.name,
                format!("jar file not found: {}", jar_path.display()),
            )
            .into());
        }

        let (program, args) = match script_kind(&entry.jar) {
            Some(ScriptKind::Shell) => (
                "sh".to_string(),
                vec![entry.jar.clone(), HEADLESS_FLAG.to_string()],
            ),
            Some(ScriptKind::Batch) => (
                "cmd".to_string(),
                vec!["/C".to_string(), entry.jar.clone(), HEADLESS_FLAG.to_string()],
            ),
            None => (
                java_bin.to_string(),
                vec![
                    format!("-Xms{}", entry.ram),
                    format!("-Xmx{}", entry.ram),
                    "-jar".to_string(),
                    entry.jar.clone(),
                    HEADLESS_FLAG.to_string(),
                ],
            ),
        };

        Ok(Self {
            server: entry.name.clone(),
            working_dir: paths.absolute_dir(),
            program,
            args,
            jar_filename: entry.jar.clone(),
            is_forge: entry.server_type.is_forge(),
            console_log: paths.console_log.clone(),
        })
    }

    /// The invocation as a single POSIX shell line.
    pub fn shell_line(&self) -> String {
        let mut words = Vec::with_capacity(self.args.len() + 1);
        words.push(self.program.as_str());
        words.extend(self.args.iter().map(String::as_str));
        shell_words::join(words)
    }

    pub fn locate_query(&self) -> LocateQuery {
        LocateQuery {
            server_name: self.server.clone(),
            jar_filename: self.jar_filename.clone(),
            working_dir: self.working_dir.clone(),
            is_forge: self.is_forge,
        }
    }

    pub fn descriptor(&self) -> FallbackDescriptor {
        FallbackDescriptor {
            name: self.server.clone(),
            jar_filename: self.jar_filename.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptKind {
    Shell,
    Batch,
}

fn script_kind(jar: &str) -> Option<ScriptKind> {
    let lowered = jar.to_ascii_lowercase();
    if lowered.ends_with(".sh") {
        Some(ScriptKind::Shell)
    } else if lowered.ends_with(".bat") || lowered.ends_with(".cmd") {
        Some(ScriptKind::Batch)
    } else {
        None
    }
}

/// Starts server wrappers and watcher processes.
pub trait Launcher: Send + Sync {
    /// Spawns the detached wrapper. The java pid is not known afterwards.
    fn launch(&self, plan: &LaunchPlan) -> Result<()>;

    fn spawn_watcher(&self, server: &str, pid: u32, paths: &ServerPaths) -> Result<()>;
}

/// Launches through a terminal window (configured or detected), a Windows
/// console window, or a headless shell in its own session.
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    terminal: Option<String>,
    log_rotation: LogRotationPolicy,
}

impl ShellLauncher {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            terminal: config.terminal.clone(),
            log_rotation: config.log_rotation,
        }
    }

    fn wrapper_command(&self, plan: &LaunchPlan) -> Result<(Command, bool)> {
        if let Some(template) = self.terminal.as_deref() {
            return terminal_command(template, plan);
        }

        #[cfg(windows)]
        {
            let mut command = Command::new("cmd");
            command
                .arg("/C")
                .arg("start")
                .raw_arg(format!("\"{}\"", plan.server))
                .arg("cmd")
                .arg("/K")
                .arg(&plan.program)
                .args(&plan.args);
            return Ok((command, false));
        }

        #[cfg(not(windows))]
        {
            if let Some(template) = detect_terminal(display_available(), on_path) {
                debug!("using detected terminal {template:?} for {}", plan.server);
                return terminal_command(template, plan);
            }
            warn!(
                "no display or terminal emulator found, console window unavailable for {}; output goes to {}",
                plan.server,
                plan.console_log.display()
            );
            let mut command = Command::new("sh");
            command.arg("-c").arg(plan.shell_line());
            Ok((command, true))
        }
    }
}

fn terminal_command(template: &str, plan: &LaunchPlan) -> Result<(Command, bool)> {
    let argv = terminal_argv(template, &plan.server, &plan.shell_line())?;
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);
    Ok((command, false))
}

/// Terminals tried in order when no template is configured, with the flags
/// each one takes for a window title and a command to run.
#[cfg_attr(windows, allow(dead_code))]
const KNOWN_TERMINALS: [(&str, &str); 3] = [
    ("x-terminal-emulator", "x-terminal-emulator -T {name} -e"),
    ("gnome-terminal", "gnome-terminal --title {name} --"),
    ("xterm", "xterm -T {name} -e"),
];

#[cfg_attr(windows, allow(dead_code))]
fn detect_terminal(display: bool, on_path: impl Fn(&str) -> bool) -> Option<&'static str> {
    if !display {
        return None;
    }
    KNOWN_TERMINALS
        .iter()
        .find(|(program, _)| on_path(*program))
        .map(|(_, template)| *template)
}

#[cfg(not(windows))]
fn display_available() -> bool {
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|key| env::var_os(key).is_some_and(|value| !value.is_empty()))
}

#[cfg(not(windows))]
fn on_path(program: &str) -> bool {
    env::var_os("PATH").is_some_and(|paths| {
        env::split_paths(&paths).any(|dir| dir.join(program).is_file())
    })
}

impl Launcher for ShellLauncher {
    fn launch(&self, plan: &LaunchPlan) -> Result<()> {
        let (mut command, capture_output) = self.wrapper_command(plan)?;
        command.current_dir(&plan.working_dir).stdin(Stdio::null());

        if capture_output {
            let (stdout, stderr) = open_log_writer(&plan.console_log, self.log_rotation)?;
            command.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        detach(&mut command);

        debug!("launching {} with: {}", plan.server, plan.shell_line());
        command
            .spawn()
            .map_err(|err| CraftError::launch_failure(&plan.server, err.to_string()))?;
        info!("launched wrapper for server {} in {}", plan.server, plan.working_dir.display());
        Ok(())
    }

    fn spawn_watcher(&self, server: &str, pid: u32, paths: &ServerPaths) -> Result<()> {
        let executable = env::current_exe().context("failed to locate current executable")?;
        let (stdout, stderr) = open_log_writer(&paths.watcher_log, self.log_rotation)?;

        let mut command = Command::new(executable);
        command
            .arg("watch")
            .arg(server)
            .arg(pid.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        detach(&mut command);

        command
            .spawn()
            .with_context(|| format!("failed to spawn watcher for {server}"))?;
        info!("watcher started for server {server} (pid {pid})");
        Ok(())
    }
}

/// Splits a terminal template such as `xterm -T {name} -e` and appends the
/// wrapped shell command.
fn terminal_argv(template: &str, server: &str, shell_line: &str) -> Result<Vec<String>> {
    let mut argv: Vec<String> = shell_words::split(template)
        .with_context(|| format!("invalid terminal template {template:?}"))?
        .into_iter()
        .map(|word| word.replace("{name}", server))
        .collect();
    if argv.is_empty() {
        anyhow::bail!("terminal template is empty");
    }
    argv.extend(["sh".to_string(), "-c".to_string(), shell_line.to_string()]);
    Ok(argv)
}

#[cfg(unix)]
fn detach(command: &mut Command) {
    // New session: no controlling terminal, survives the CLI exiting.
    unsafe {
        command.pre_exec(|| {
            if nix::libc::setsid() == -1 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(())
            }
        });
    }
}

#[cfg(windows)]
fn detach(command: &mut Command) {
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_command: &mut Command) {}

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::ServerPaths;
use crate::storage::{remove_if_exists, write_atomic};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Stop,
    Unknown(String),
}

impl ControlCommand {
    pub fn parse(raw: &str) -> Self {
        let token = raw.trim();
        if token.eq_ignore_ascii_case("stop") {
            ControlCommand::Stop
        } else {
            ControlCommand::Unknown(token.to_string())
        }
    }

    pub fn as_token(&self) -> &str {
        match self {
            ControlCommand::Stop => "stop",
            ControlCommand::Unknown(token) => token,
        }
    }
}

/// One-shot `command.txt` drop box read by the watcher. The latest
/// unconsumed command overwrites any earlier one.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    servers_dir: PathBuf,
}

impl CommandChannel {
    pub fn new(servers_dir: &Path) -> Self {
        Self {
            servers_dir: servers_dir.to_path_buf(),
        }
    }

    fn command_path(&self, name: &str) -> PathBuf {
        ServerPaths::new(&self.servers_dir, name).command
    }

    pub fn send(&self, name: &str, command: &ControlCommand) -> Result<()> {
        write_atomic(&self.command_path(name), command.as_token().as_bytes())
            .with_context(|| format!("failed to send {} to {name}", command.as_token()))
    }

    pub fn try_consume(&self, name: &str) -> Result<Option<ControlCommand>> {
        let path = self.command_path(name);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        remove_if_exists(&path)?;
        Ok(Some(ControlCommand::parse(&raw)))
    }

    pub fn clear(&self, name: &str) -> Result<()> {
        remove_if_exists(&self.command_path(name))?;
        Ok(())
    }
}

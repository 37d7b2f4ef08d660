use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CraftError {
    #[error("server not found: {0}")]
    ServerNotFound(String),
    #[error("server already exists: {0}")]
    DuplicateServer(String),
    #[error("invalid server name: {0}")]
    InvalidServerName(String),
    #[error("server {0} is already running")]
    AlreadyRunning(String),
    #[error("server {0} is not running")]
    NotRunning(String),
    #[error("failed to launch server {name}: {reason}")]
    LaunchFailure { name: String, reason: String },
    #[error("invalid RAM value {0:?}: use a size like 2G or 1024M")]
    InvalidRam(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CraftError {
    pub fn launch_failure(name: &str, reason: impl Into<String>) -> Self {
        CraftError::LaunchFailure {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

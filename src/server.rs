use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    Paper,
    Vanilla,
    Fabric,
    Forge,
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            ServerType::Paper => "paper",
            ServerType::Vanilla => "vanilla",
            ServerType::Fabric => "fabric",
            ServerType::Forge => "forge",
        };
        write!(f, "{value}")
    }
}

impl ServerType {
    /// File name the provisioned server jar is stored under.
    pub fn default_jar_name(&self) -> &'static str {
        match self {
            ServerType::Fabric => "fabric-server-launch.jar",
            _ => "server.jar",
        }
    }

    pub fn is_forge(&self) -> bool {
        matches!(self, ServerType::Forge)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Peaceful,
    Easy,
    Normal,
    Hard,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Difficulty::Peaceful => "peaceful",
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
        };
        write!(f, "{value}")
    }
}

/// A provisioned server as recorded in the registry.
///
/// Lifecycle code reads the launch fields (`jar`, `ram`, `port`, `server_type`)
/// and never writes any of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerEntry {
    pub name: String,
    pub jar: String,
    pub ram: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub server_type: ServerType,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_render_distance")]
    pub render_distance: u32,
    #[serde(default = "default_difficulty")]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub hardcore: bool,
}

impl ServerEntry {
    pub fn target_label(&self) -> String {
        format!("{} ({}, port {})", self.name, self.server_type, self.port)
    }
}

fn default_render_distance() -> u32 {
    10
}

fn default_difficulty() -> Difficulty {
    Difficulty::Normal
}

/// Lifecycle phase of a single server as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            ServerPhase::Stopped => "stopped",
            ServerPhase::Starting => "starting",
            ServerPhase::Running => "running",
            ServerPhase::Stopping => "stopping",
        };
        write!(f, "{value}")
    }
}

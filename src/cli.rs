use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::server::{Difficulty, ServerType};

const BUILD_VERSION: &str = env!("CRAFTMGR_BUILD_VERSION");
const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
USAGE:
  {usage}

COMMANDS:
{subcommands}

OPTIONS:
{options}
{after-help}
";
const HELP_AFTER: &str = "\
Quick Command Map
  Provisioning:
    create, edit, delete/rm
  Lifecycle:
    start, stop, restart/rs
  Runtime:
    list/ls/ps, status, logs/log

Compatibility Aliases
  list    -> ls, ps
  delete  -> rm
  restart -> rs
  logs    -> log

Examples
  craftmgr create survival --jar ~/Downloads/paper-1.21.4.jar --ram 4G
  craftmgr start survival
  craftmgr log survival -n 50
  craftmgr rs survival
";

#[derive(Debug, Parser)]
#[command(
    name = "craftmgr",
    version = BUILD_VERSION,
    about = "Minecraft server manager",
    help_template = HELP_TEMPLATE,
    after_help = HELP_AFTER
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Provision a new server from a jar on disk.
    Create {
        name: String,
        #[arg(long)]
        jar: PathBuf,
        #[arg(long = "type", value_enum, default_value_t = ServerKindArg::Paper)]
        server_type: ServerKindArg,
        #[arg(long, default_value = "2G")]
        ram: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "render-distance", default_value_t = 10)]
        render_distance: u32,
        #[arg(long, value_enum, default_value_t = DifficultyArg::Normal)]
        difficulty: DifficultyArg,
    },
    /// Change settings or server software of an existing server.
    Edit {
        name: String,
        #[arg(long)]
        ram: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long = "type", value_enum)]
        server_type: Option<ServerKindArg>,
        #[arg(long)]
        version: Option<String>,
        #[arg(long, value_enum)]
        difficulty: Option<DifficultyArg>,
        /// New server jar; required with --type.
        #[arg(long)]
        jar: Option<PathBuf>,
    },
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    #[command(visible_alias = "rs")]
    Restart {
        name: String,
    },
    #[command(visible_alias = "rm")]
    Delete {
        name: String,
    },
    #[command(visible_aliases = ["ls", "ps"])]
    List,
    Status {
        name: String,
    },
    /// Live CPU, memory, disk and network readings for a running server.
    #[command(visible_alias = "top")]
    Monitor {
        name: String,
    },
    #[command(visible_alias = "log")]
    Logs {
        name: String,
        #[arg(short = 'f', long)]
        follow: bool,
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
    },
    /// Guard a running server and kill it on request (started by `start`).
    #[command(hide = true)]
    Watch {
        server_name: String,
        #[arg(value_parser = clap::value_parser!(u32).range(1..=i32::MAX as i64))]
        target_pid: u32,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ServerKindArg {
    Paper,
    Vanilla,
    Fabric,
    Forge,
}

impl From<ServerKindArg> for ServerType {
    fn from(value: ServerKindArg) -> Self {
        match value {
            ServerKindArg::Paper => ServerType::Paper,
            ServerKindArg::Vanilla => ServerType::Vanilla,
            ServerKindArg::Fabric => ServerType::Fabric,
            ServerKindArg::Forge => ServerType::Forge,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum DifficultyArg {
    Peaceful,
    Easy,
    Normal,
    Hard,
    Hardcore,
}

impl DifficultyArg {
    /// Hardcore worlds are stored as `hard` with the hardcore flag set.
    pub fn resolve(self) -> (Difficulty, bool) {
        match self {
            DifficultyArg::Peaceful => (Difficulty::Peaceful, false),
            DifficultyArg::Easy => (Difficulty::Easy, false),
            DifficultyArg::Normal => (Difficulty::Normal, false),
            DifficultyArg::Hard => (Difficulty::Hard, false),
            DifficultyArg::Hardcore => (Difficulty::Hard, true),
        }
    }
}

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::{DifficultyArg, ServerKindArg};
use crate::config::AppConfig;
use crate::events::sink_from_config;
use crate::provision::{create_server, CreateRequest};

pub(crate) struct CreateArgs {
    pub(crate) name: String,
    pub(crate) jar: PathBuf,
    pub(crate) server_type: ServerKindArg,
    pub(crate) ram: String,
    pub(crate) port: Option<u16>,
    pub(crate) version: Option<String>,
    pub(crate) description: String,
    pub(crate) render_distance: u32,
    pub(crate) difficulty: DifficultyArg,
}

pub(crate) fn run(config: &AppConfig, args: CreateArgs) -> Result<()> {
    let (difficulty, hardcore) = args.difficulty.resolve();
    let events = sink_from_config(config);
    let entry = create_server(
        config,
        CreateRequest {
            name: args.name,
            jar_source: args.jar,
            server_type: args.server_type.into(),
            ram: args.ram,
            port: args.port,
            version: args.version,
            description: args.description,
            render_distance: args.render_distance,
            difficulty,
            hardcore,
        },
        events.as_ref(),
    )?;

    println!(
        "Created {} server {} (ram {}, port {}).",
        entry.server_type, entry.name, entry.ram, entry.port
    );
    println!("Directory: {}", config.server_paths(&entry.name).dir.display());

    Ok(())
}

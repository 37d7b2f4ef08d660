mod common;
mod create;
mod delete;
mod edit;
mod list;
mod logs;
mod monitor;
mod restart;
mod start;
mod status;
mod stop;
mod watch;

use anyhow::Result;

use crate::cli::{Commands, DifficultyArg};
use crate::config::AppConfig;
use crate::provision::EditRequest;

pub async fn run(command: Commands, config: &AppConfig) -> Result<()> {
    match command {
        Commands::Create {
            name,
            jar,
            server_type,
            ram,
            port,
            version,
            description,
            render_distance,
            difficulty,
        } => create::run(
            config,
            create::CreateArgs {
                name,
                jar,
                server_type,
                ram,
                port,
                version,
                description,
                render_distance,
                difficulty,
            },
        )?,
        Commands::Edit {
            name,
            ram,
            port,
            server_type,
            version,
            difficulty,
            jar,
        } => edit::run(
            config,
            name,
            EditRequest {
                ram,
                port,
                server_type: server_type.map(Into::into),
                version,
                difficulty: difficulty.map(DifficultyArg::resolve),
                jar_source: jar,
            },
        )?,
        Commands::Start { name } => start::run(config, name).await?,
        Commands::Stop { name } => stop::run(config, name).await?,
        Commands::Restart { name } => restart::run(config, name).await?,
        Commands::Delete { name } => delete::run(config, name).await?,
        Commands::List => list::run(config)?,
        Commands::Status { name } => status::run(config, name)?,
        Commands::Monitor { name } => monitor::run(config, name).await?,
        Commands::Logs {
            name,
            follow,
            lines,
        } => logs::run(config, name, follow, lines).await?,
        Commands::Watch {
            server_name,
            target_pid,
        } => watch::run(config, server_name, target_pid).await?,
    }

    Ok(())
}

use anyhow::Result;

use crate::config::AppConfig;
use crate::provision::{edit_server, EditRequest};

pub(crate) fn run(config: &AppConfig, name: String, request: EditRequest) -> Result<()> {
    if request.is_empty() {
        anyhow::bail!(
            "nothing to change: pass --ram, --port, --type, --version, --difficulty or --jar"
        );
    }

    let entry = edit_server(config, &name, request)?;
    println!(
        "Updated {}: {} {}, ram {}, port {}, difficulty {}{}. Restart the server to apply.",
        entry.name,
        entry.server_type,
        entry.version.as_deref().unwrap_or("-"),
        entry.ram,
        entry.port,
        entry.difficulty,
        if entry.hardcore { " (hardcore)" } else { "" }
    );

    Ok(())
}

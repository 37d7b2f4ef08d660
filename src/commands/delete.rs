use anyhow::Result;

use crate::config::AppConfig;

use super::common::supervisor;

pub(crate) async fn run(config: &AppConfig, name: String) -> Result<()> {
    supervisor(config).delete(&name).await?;
    println!("Server {name} deleted.");

    Ok(())
}

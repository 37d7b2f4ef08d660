use std::io::{SeekFrom, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::{sleep, Duration};

use crate::config::AppConfig;
use crate::logging::read_last_lines;
use crate::storage::load_registry;

const FOLLOW_INTERVAL: Duration = Duration::from_millis(300);

pub(crate) async fn run(config: &AppConfig, name: String, follow: bool, lines: usize) -> Result<()> {
    load_registry(&config.registry_path)?.get(&name)?;
    let path = config.server_paths(&name).console_log;

    println!("==> {} <==", path.display());
    for line in read_last_lines(&path, lines)? {
        println!("{line}");
    }

    if follow {
        println!("Following console (Ctrl-C to stop)...");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            result = follow_file(path) => result?,
        }
    }

    Ok(())
}

/// Streams bytes appended to the console log. A log that shrinks was rotated
/// and is read again from the start; a missing log is waited for.
async fn follow_file(path: PathBuf) -> Result<()> {
    let mut offset = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    loop {
        sleep(FOLLOW_INTERVAL).await;

        let Ok(meta) = tokio::fs::metadata(&path).await else {
            continue;
        };
        if meta.len() < offset {
            offset = 0;
        }
        if meta.len() == offset {
            continue;
        }

        let mut file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut chunk = Vec::new();
        offset += file.read_to_end(&mut chunk).await? as u64;

        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&chunk)?;
        stdout.flush()?;
    }
}

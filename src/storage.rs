use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::CraftError;
use crate::server::ServerEntry;

/// All provisioned servers, keyed by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerRegistry {
    pub servers: BTreeMap<String, ServerEntry>,
}

impl ServerRegistry {
    pub fn get(&self, name: &str) -> Result<&ServerEntry> {
        self.servers
            .get(name)
            .ok_or_else(|| CraftError::ServerNotFound(name.to_string()).into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn insert(&mut self, entry: ServerEntry) {
        self.servers.insert(entry.name.clone(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<ServerEntry> {
        self.servers.remove(name)
    }
}

pub fn load_registry(path: &Path) -> Result<ServerRegistry> {
    if !path.exists() {
        return Ok(ServerRegistry::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read server registry {}", path.display()))?;

    if content.trim().is_empty() {
        return Ok(ServerRegistry::default());
    }

    match serde_json::from_str::<ServerRegistry>(&content) {
        Ok(registry) => Ok(registry),
        Err(error) => {
            let backup = corrupted_backup_path(path);
            if let Err(rename_err) = fs::rename(path, &backup) {
                warn!(
                    "failed to move corrupted registry {} -> {}: {rename_err}",
                    path.display(),
                    backup.display()
                );
            } else {
                warn!(
                    "server registry {} is corrupted ({error}), moved to {}",
                    path.display(),
                    backup.display()
                );
            }
            Ok(ServerRegistry::default())
        }
    }
}

pub fn save_registry(path: &Path, registry: &ServerRegistry) -> Result<()> {
    let payload = serde_json::to_vec_pretty(registry)?;
    write_atomic(path, &payload)
}

/// Writes `contents` next to `path` and renames it into place so readers never
/// observe a partial file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let tmp_path = tmp_path(path);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("failed to write temporary file {}", tmp_path.display()))?;
    replace_file(&tmp_path, path)
}

/// Removes `path`, treating an already missing file as success.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

fn corrupted_backup_path(path: &Path) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    path.with_extension(format!("corrupt-{suffix}.json"))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|value| value.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn replace_file(tmp_path: &Path, path: &Path) -> Result<()> {
    match fs::rename(tmp_path, path) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            #[cfg(windows)]
            {
                if path.exists() {
                    fs::remove_file(path)
                        .with_context(|| format!("failed to remove {}", path.display()))?;
                    fs::rename(tmp_path, path)
                        .with_context(|| format!("failed to replace {}", path.display()))?;
                    return Ok(());
                }
            }

            let _ = fs::remove_file(tmp_path);
            Err(rename_err).with_context(|| format!("failed to replace {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{load_registry, remove_if_exists, save_registry, write_atomic, ServerRegistry};
    use crate::errors::CraftError;
    use crate::server::{Difficulty, ServerEntry, ServerType};

    #[test]
    fn save_and_load_roundtrip() {
        let path = temp_file("roundtrip");
        let mut registry = ServerRegistry::default();
        registry.insert(entry("alpha"));

        save_registry(&path, &registry).expect("failed to save registry");
        let loaded = load_registry(&path).expect("failed to load registry");

        assert_eq!(loaded.servers.len(), 1);
        assert_eq!(loaded.get("alpha").expect("alpha entry").port, 25565);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn registry_is_stored_as_a_name_keyed_map() {
        let path = temp_file("shape");
        let mut registry = ServerRegistry::default();
        registry.insert(entry("alpha"));
        save_registry(&path, &registry).expect("failed to save registry");

        let raw = fs::read_to_string(&path).expect("failed to read registry");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(value["alpha"]["jar"], "server.jar");
        assert_eq!(value["alpha"]["type"], "paper");

        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_server_lookup_is_not_found() {
        let registry = ServerRegistry::default();
        let err = registry.get("ghost").expect_err("expected lookup failure");
        assert!(matches!(
            err.downcast_ref::<CraftError>(),
            Some(CraftError::ServerNotFound(name)) if name == "ghost"
        ));
    }

    #[test]
    fn load_registry_recovers_from_corruption() {
        let path = temp_file("corrupt");
        fs::write(&path, "{ not valid json ]").expect("failed to write corrupted registry");

        let loaded = load_registry(&path).expect("load should recover from corruption");
        assert!(loaded.servers.is_empty());
        assert!(!path.exists(), "corrupted file should have been renamed");

        if let Some(parent) = path.parent() {
            let stem = path
                .file_stem()
                .and_then(|value| value.to_str())
                .unwrap_or_default()
                .to_string();
            if let Ok(entries) = parent.read_dir() {
                for entry in entries.flatten() {
                    if let Some(name) = entry.file_name().to_str() {
                        if name.starts_with(&stem) && name.contains("corrupt-") {
                            let _ = fs::remove_file(entry.path());
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn write_atomic_replaces_content_without_leaving_temp_file() {
        let path = temp_file("atomic");
        write_atomic(&path, b"first").expect("first write");
        write_atomic(&path, b"second").expect("second write");

        assert_eq!(fs::read_to_string(&path).expect("read back"), "second");
        let tmp = path.with_file_name(format!(
            "{}.tmp",
            path.file_name().and_then(|v| v.to_str()).unwrap_or_default()
        ));
        assert!(!tmp.exists(), "temporary file should be renamed away");

        let _ = fs::remove_file(path);
    }

    #[test]
    fn remove_if_exists_is_idempotent() {
        let path = temp_file("remove");
        fs::write(&path, "x").expect("seed file");

        assert!(remove_if_exists(&path).expect("first removal"));
        assert!(!remove_if_exists(&path).expect("second removal"));
    }

    fn entry(name: &str) -> ServerEntry {
        ServerEntry {
            name: name.to_string(),
            jar: "server.jar".to_string(),
            ram: "2G".to_string(),
            port: 25565,
            server_type: ServerType::Paper,
            version: Some("1.21.4".to_string()),
            description: String::new(),
            render_distance: 10,
            difficulty: Difficulty::Normal,
            hardcore: false,
        }
    }

    fn temp_file(prefix: &str) -> std::path::PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock failure")
            .as_nanos();
        std::env::temp_dir().join(format!("craftmgr-{prefix}-{nonce}.servers.json"))
    }
}

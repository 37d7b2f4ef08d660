//! Creating and editing server entries and their directories.

use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sysinfo::System;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::CraftError;
use crate::events::{EventSink, LifecycleEvent};
use crate::server::{Difficulty, ServerEntry, ServerType};
use crate::storage::{load_registry, remove_if_exists, save_registry, write_atomic, ServerRegistry};

const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub jar_source: PathBuf,
    pub server_type: ServerType,
    pub ram: String,
    pub port: Option<u16>,
    pub version: Option<String>,
    pub description: String,
    pub render_distance: u32,
    pub difficulty: Difficulty,
    pub hardcore: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EditRequest {
    pub ram: Option<String>,
    pub port: Option<u16>,
    pub server_type: Option<ServerType>,
    pub version: Option<String>,
    /// Difficulty plus the hardcore flag.
    pub difficulty: Option<(Difficulty, bool)>,
    /// Replacement server software. Required when the type changes.
    pub jar_source: Option<PathBuf>,
}

impl EditRequest {
    pub fn is_empty(&self) -> bool {
        self.ram.is_none()
            && self.port.is_none()
            && self.server_type.is_none()
            && self.version.is_none()
            && self.difficulty.is_none()
            && self.jar_source.is_none()
    }
}

pub fn validate_server_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(CraftError::InvalidServerName(name.to_string()).into())
    }
}

/// Parses `2G` / `1024M` into megabytes and returns the canonical spelling.
pub fn parse_ram(raw: &str) -> Result<(String, u64)> {
    let value = raw.trim().to_ascii_uppercase();
    let invalid = || CraftError::InvalidRam(raw.to_string());

    let (digits, unit_mb) = if let Some(digits) = value.strip_suffix('G') {
        (digits, 1024)
    } else if let Some(digits) = value.strip_suffix('M') {
        (digits, 1)
    } else {
        return Err(invalid().into());
    };

    let amount = digits.parse::<u64>().map_err(|_| invalid())?;
    if amount == 0 {
        return Err(invalid().into());
    }
    Ok((value.clone(), amount.saturating_mul(unit_mb)))
}

fn warn_if_exceeds_available(ram: &str, requested_mb: u64) {
    let mut system = System::new();
    system.refresh_memory();
    let available_mb = system.available_memory() / (1024 * 1024);
    if available_mb > 0 && requested_mb > available_mb {
        warn!("requested {ram} but only {available_mb} MB of memory is currently available");
    }
}

pub fn free_port() -> Result<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0)).context("failed to find a free port")?;
    Ok(listener.local_addr()?.port())
}

pub fn server_properties(entry: &ServerEntry) -> String {
    let mut properties = format!(
        "server-port={}\nonline-mode=true\nrender-distance={}\nview-distance={}\ndifficulty={}\n",
        entry.port, entry.render_distance, entry.render_distance, entry.difficulty
    );
    if entry.hardcore {
        properties.push_str("hardcore=true\n");
    }
    properties
}

/// Stored jar name: forge keeps the launcher's own filename.
fn stored_jar_name(server_type: ServerType, source: &Path) -> Result<String> {
    if server_type.is_forge() {
        return source
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .with_context(|| format!("invalid jar path {}", source.display()));
    }
    Ok(server_type.default_jar_name().to_string())
}

pub fn create_server(
    config: &AppConfig,
    request: CreateRequest,
    events: &dyn EventSink,
) -> Result<ServerEntry> {
    validate_server_name(&request.name)?;

    let mut registry = load_registry(&config.registry_path)?;
    let paths = config.server_paths(&request.name);
    if let Some(existing) = name_in_use(config, &registry, &request.name)? {
        if existing != request.name {
            warn!(
                "{} differs from existing server {existing} only by case",
                request.name
            );
        }
        return Err(CraftError::DuplicateServer(request.name).into());
    }

    let (ram, requested_mb) = parse_ram(&request.ram)?;
    warn_if_exceeds_available(&ram, requested_mb);

    if !request.jar_source.is_file() {
        anyhow::bail!("server jar not found: {}", request.jar_source.display());
    }

    let port = match request.port {
        Some(port) => port,
        None => free_port()?,
    };
    let difficulty = if request.hardcore {
        Difficulty::Hard
    } else {
        request.difficulty
    };

    let entry = ServerEntry {
        jar: stored_jar_name(request.server_type, &request.jar_source)?,
        name: request.name.clone(),
        ram,
        port,
        server_type: request.server_type,
        version: request.version,
        description: request.description,
        render_distance: request.render_distance,
        difficulty,
        hardcore: request.hardcore,
    };

    if let Err(err) = populate_server_dir(&paths.dir, &request.jar_source, &entry) {
        let _ = fs::remove_dir_all(&paths.dir);
        return Err(err);
    }

    registry.insert(entry.clone());
    if let Err(err) = save_registry(&config.registry_path, &registry) {
        let _ = fs::remove_dir_all(&paths.dir);
        return Err(err);
    }

    info!("created {} server {}", entry.server_type, entry.target_label());
    events.emit(LifecycleEvent::Created {
        server: entry.name.clone(),
        server_type: entry.server_type,
        version: entry.version.clone(),
    });
    Ok(entry)
}

/// Server names are compared ignoring ASCII case: directory matching during
/// process discovery is case-insensitive, so `alpha` and `Alpha` could claim
/// each other's java process.
fn name_in_use(config: &AppConfig, registry: &ServerRegistry, name: &str) -> Result<Option<String>> {
    if let Some(existing) = registry
        .servers
        .keys()
        .find(|existing| existing.eq_ignore_ascii_case(name))
    {
        return Ok(Some(existing.clone()));
    }

    let entries = match fs::read_dir(&config.servers_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read {}", config.servers_dir.display()))
        }
    };
    Ok(entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .find(|existing| existing.eq_ignore_ascii_case(name)))
}

fn populate_server_dir(dir: &Path, jar_source: &Path, entry: &ServerEntry) -> Result<()> {
    for sub in ["logs", "plugins", "mods"] {
        let path = dir.join(sub);
        fs::create_dir_all(&path).with_context(|| format!("failed to create {}", path.display()))?;
    }

    let jar_target = dir.join(&entry.jar);
    fs::copy(jar_source, &jar_target).with_context(|| {
        format!(
            "failed to copy {} -> {}",
            jar_source.display(),
            jar_target.display()
        )
    })?;

    write_atomic(&dir.join("eula.txt"), b"eula=true\n")?;
    write_atomic(
        &dir.join("server.properties"),
        server_properties(entry).as_bytes(),
    )?;
    Ok(())
}

pub fn edit_server(config: &AppConfig, name: &str, request: EditRequest) -> Result<ServerEntry> {
    let mut registry = load_registry(&config.registry_path)?;
    let mut entry = registry.get(name)?.clone();
    let dir = config.server_paths(name).dir;

    let new_type = request.server_type.unwrap_or(entry.server_type);
    if new_type != entry.server_type && request.jar_source.is_none() {
        anyhow::bail!(
            "changing {name} from {} to {new_type} needs --jar with the {new_type} server software",
            entry.server_type
        );
    }
    if let Some(raw) = request.ram.as_deref() {
        entry.ram = parse_ram(raw)?.0;
    }

    if let Some(source) = request.jar_source.as_deref() {
        entry.jar = replace_server_jar(&dir, &entry.jar, new_type, source)?;
    }
    entry.server_type = new_type;

    if let Some(version) = request.version {
        if request.jar_source.is_none() && entry.version.as_deref() != Some(version.as_str()) {
            warn!("recorded version {version} for {name}; its server jar was not replaced");
        }
        entry.version = Some(version);
    }

    let mut properties: Vec<(&str, String)> = Vec::new();
    if let Some(port) = request.port {
        entry.port = port;
        properties.push(("server-port", port.to_string()));
    }
    if let Some((difficulty, hardcore)) = request.difficulty {
        entry.difficulty = if hardcore { Difficulty::Hard } else { difficulty };
        entry.hardcore = hardcore;
        properties.push(("difficulty", entry.difficulty.to_string()));
        properties.push(("hardcore", hardcore.to_string()));
    }
    if !properties.is_empty() {
        rewrite_properties(&dir.join("server.properties"), &properties)?;
    }

    registry.insert(entry.clone());
    save_registry(&config.registry_path, &registry)?;
    info!("updated server {}", entry.target_label());
    Ok(entry)
}

/// Copies `source` in under the name `server_type` stores its jar as and
/// removes the previous jar when that name differs.
fn replace_server_jar(
    dir: &Path,
    current: &str,
    server_type: ServerType,
    source: &Path,
) -> Result<String> {
    if !source.is_file() {
        anyhow::bail!("server jar not found: {}", source.display());
    }
    let stored = stored_jar_name(server_type, source)?;
    let target = dir.join(&stored);
    fs::copy(source, &target).with_context(|| {
        format!("failed to copy {} -> {}", source.display(), target.display())
    })?;

    if stored != current {
        remove_if_exists(&dir.join(current))?;
    }
    Ok(stored)
}

/// Sets `key=value` for each pair, replacing existing lines and appending
/// missing keys. Other lines are kept as they are.
fn rewrite_properties(path: &Path, updates: &[(&str, String)]) -> Result<()> {
    let existing = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()))
        }
    };

    let mut pending: Vec<&(&str, String)> = updates.iter().collect();
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            let key = line.split_once('=').map(|(key, _)| key.trim());
            match pending.iter().position(|(update, _)| Some(*update) == key) {
                Some(idx) => {
                    let (key, value) = pending.remove(idx);
                    format!("{key}={value}")
                }
                None => line.to_string(),
            }
        })
        .collect();
    lines.extend(pending.into_iter().map(|(key, value)| format!("{key}={value}")));

    let mut content = lines.join("\n");
    content.push('\n');
    write_atomic(path, content.as_bytes())
}

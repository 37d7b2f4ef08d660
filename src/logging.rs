//! Server and watcher log files: size-based rotation with `.N` suffixes,
//! count and age pruning, and tailing for `craftmgr logs`.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy)]
pub struct LogRotationPolicy {
    pub max_size_bytes: u64,
    pub max_files: u32,
    pub max_age_days: u64,
}

impl LogRotationPolicy {
    fn rotates(&self) -> bool {
        self.max_size_bytes > 0 && self.max_files > 0
    }

    fn max_age(&self) -> Option<Duration> {
        (self.max_age_days > 0)
            .then(|| Duration::from_secs(self.max_age_days.saturating_mul(24 * 60 * 60)))
    }
}

/// Opens `path` for appending after rotating and pruning it.
///
/// Returns two handles to the same file so a spawned process can use one for
/// stdout and the other for stderr.
pub fn open_log_writer(path: &Path, policy: LogRotationPolicy) -> Result<(File, File)> {
    let log = RotatingLog { path, policy };
    log.prepare()?;

    let stdout = log.open_append()?;
    let stderr = stdout
        .try_clone()
        .with_context(|| format!("failed duplicating handle for {}", path.display()))?;
    Ok((stdout, stderr))
}

struct RotatingLog<'a> {
    path: &'a Path,
    policy: LogRotationPolicy,
}

impl RotatingLog<'_> {
    fn prepare(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            create_private_dir(parent)?;
        }
        if self.needs_rotation()? {
            self.rotate()?;
        }
        self.prune()
    }

    fn needs_rotation(&self) -> Result<bool> {
        if !self.policy.rotates() {
            return Ok(false);
        }
        match fs::metadata(self.path) {
            Ok(meta) => Ok(meta.len() >= self.policy.max_size_bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("failed to stat {}", self.path.display())),
        }
    }

    /// `console.log` becomes `console.log.1`, `.1` becomes `.2` and so on. The
    /// oldest generation past `max_files` is dropped.
    fn rotate(&self) -> Result<()> {
        let _ = fs::remove_file(self.generation(self.policy.max_files));
        for index in (1..self.policy.max_files).rev() {
            let from = self.generation(index);
            if from.exists() {
                self.shift(&from, &self.generation(index + 1))?;
            }
        }
        self.shift(self.path, &self.generation(1))
    }

    fn shift(&self, from: &Path, to: &Path) -> Result<()> {
        let _ = fs::remove_file(to);
        fs::rename(from, to)
            .with_context(|| format!("failed to rotate {} -> {}", from.display(), to.display()))
    }

    fn prune(&self) -> Result<()> {
        let (Some(dir), Some(base)) = (
            self.path.parent(),
            self.path.file_name().and_then(|name| name.to_str()),
        ) else {
            return Ok(());
        };

        let now = SystemTime::now();
        let entries =
            fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(index) = name.to_str().and_then(|name| generation_index(base, name)) else {
                continue;
            };

            let expired = self.policy.max_age().is_some_and(|max_age| {
                entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .map(|modified| now.duration_since(modified).unwrap_or_default() > max_age)
                    .unwrap_or(false)
            });
            if index > self.policy.max_files || expired {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    fn open_append(&self) -> Result<File> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file = options
            .open(self.path)
            .with_context(|| format!("failed opening {}", self.path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to set permissions on {}", self.path.display()))?;
        }
        Ok(file)
    }

    fn generation(&self, index: u32) -> PathBuf {
        let mut raw = self.path.as_os_str().to_owned();
        raw.push(format!(".{index}"));
        PathBuf::from(raw)
    }
}

fn generation_index(base: &str, file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(base)?
        .strip_prefix('.')?
        .parse()
        .ok()
}

fn create_private_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

const TAIL_WINDOW: u64 = 16 * 1024;

/// Last `max_lines` lines of `path`. A missing file reads as empty.
pub fn read_last_lines(path: &Path, max_lines: usize) -> Result<Vec<String>> {
    if max_lines == 0 {
        return Ok(Vec::new());
    }
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("failed opening {}", path.display())),
    };
    let len = file
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();

    // Grow the window from the end until it holds enough line breaks.
    let mut window = TAIL_WINDOW.min(len);
    let mut bytes = Vec::new();
    loop {
        file.seek(SeekFrom::Start(len - window))
            .with_context(|| format!("failed seeking {}", path.display()))?;
        bytes.clear();
        (&mut file)
            .take(window)
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed reading {}", path.display()))?;

        let breaks = bytes.iter().filter(|&&byte| byte == b'\n').count();
        if breaks > max_lines || window == len {
            break;
        }
        window = window.saturating_mul(2).min(len);
    }

    let text = String::from_utf8_lossy(&bytes);
    let mut tail = VecDeque::with_capacity(max_lines + 1);
    for line in text.lines() {
        if tail.len() == max_lines {
            tail.pop_front();
        }
        tail.push_back(line.to_string());
    }
    Ok(tail.into())
}

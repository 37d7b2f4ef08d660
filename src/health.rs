//! Resource readings for a running server.
//!
//! `status` takes a single reading; `monitor` keeps sampling until the run-state
//! marker disappears or the tracked process is gone, and keeps short CPU and
//! memory histories for trend lines.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use sysinfo::{Disks, Networks, Pid as SysPid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::time::sleep;
use tracing::debug;

const TREND_LEN: usize = 10;
const TREND_GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessUsage {
    /// Percent of one core, so multi-threaded servers can exceed 100.
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    pub run_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub available_bytes: u64,
    pub total_bytes: u64,
}

impl DiskUsage {
    pub fn used_percent(&self) -> f32 {
        percent(self.total_bytes.saturating_sub(self.available_bytes), self.total_bytes)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    /// `None` once the tracked process has exited.
    pub process: Option<ProcessUsage>,
    pub cpu_percent: f32,
    pub per_core: Vec<f32>,
    pub memory_used: u64,
    pub memory_total: u64,
    /// The disk holding the server directory.
    pub disk: Option<DiskUsage>,
    pub network_sent: u64,
    pub network_received: u64,
}

impl ResourceSample {
    pub fn memory_percent(&self) -> f32 {
        percent(self.memory_used, self.memory_total)
    }
}

pub trait ResourceSampler: Send {
    fn sample(&mut self, pid: u32) -> ResourceSample;
}

/// Reads the host through sysinfo. CPU figures are deltas between refreshes,
/// so the first sample reports zero CPU.
pub struct SystemSampler {
    system: System,
    disks: Disks,
    networks: Networks,
    server_dir: PathBuf,
}

impl SystemSampler {
    pub fn new(server_dir: &Path) -> Self {
        Self {
            system: System::new(),
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            server_dir: server_dir
                .canonicalize()
                .unwrap_or_else(|_| server_dir.to_path_buf()),
        }
    }

    fn disk_usage(&self) -> Option<DiskUsage> {
        self.disks
            .list()
            .iter()
            .filter(|disk| self.server_dir.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| DiskUsage {
                available_bytes: disk.available_space(),
                total_bytes: disk.total_space(),
            })
    }
}

impl ResourceSampler for SystemSampler {
    fn sample(&mut self, pid: u32) -> ResourceSample {
        let sys_pid = SysPid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        self.disks.refresh(true);
        self.networks.refresh(true);

        let process = self.system.process(sys_pid).map(|process| ProcessUsage {
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
            run_time: Duration::from_secs(process.run_time()),
        });
        let (network_sent, network_received) = self
            .networks
            .list()
            .values()
            .fold((0, 0), |(sent, received), data| {
                (sent + data.total_transmitted(), received + data.total_received())
            });

        ResourceSample {
            process,
            cpu_percent: self.system.global_cpu_usage(),
            per_core: self.system.cpus().iter().map(|cpu| cpu.cpu_usage()).collect(),
            memory_used: self.system.used_memory(),
            memory_total: self.system.total_memory(),
            disk: self.disk_usage(),
            network_sent,
            network_received,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    Healthy,
    Moderate,
    High,
}

impl HealthLevel {
    pub fn for_cpu(percent: f32) -> Self {
        Self::classify(percent, 50.0, 75.0)
    }

    pub fn for_memory(percent: f32) -> Self {
        Self::classify(percent, 70.0, 85.0)
    }

    fn classify(percent: f32, moderate: f32, high: f32) -> Self {
        if percent < moderate {
            HealthLevel::Healthy
        } else if percent < high {
            HealthLevel::Moderate
        } else {
            HealthLevel::High
        }
    }
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            HealthLevel::Healthy => "healthy",
            HealthLevel::Moderate => "moderate",
            HealthLevel::High => "high",
        };
        write!(f, "{value}")
    }
}

/// The last few percentages, oldest first.
#[derive(Debug, Clone, Default)]
pub struct Trend {
    values: VecDeque<f32>,
}

impl Trend {
    pub fn push(&mut self, value: f32) {
        if self.values.len() == TREND_LEN {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// One glyph per reading, eighth-steps of 12.5%.
    pub fn sparkline(&self) -> String {
        self.values
            .iter()
            .map(|value| {
                let step = (value.max(0.0) / 12.5) as usize;
                TREND_GLYPHS[step.min(TREND_GLYPHS.len() - 1)]
            })
            .collect()
    }
}

pub struct HealthReport<'a> {
    pub server: &'a str,
    pub pid: u32,
    pub updates: u64,
    pub sample: &'a ResourceSample,
    pub cpu_trend: &'a Trend,
    pub memory_trend: &'a Trend,
}

impl HealthReport<'_> {
    pub fn cpu_level(&self) -> HealthLevel {
        HealthLevel::for_cpu(self.sample.cpu_percent)
    }

    pub fn memory_level(&self) -> HealthLevel {
        HealthLevel::for_memory(self.sample.memory_percent())
    }

    pub fn lines(&self) -> Vec<String> {
        let sample = self.sample;
        let mut lines = vec![format!("Server:      {} (pid {})", self.server, self.pid)];
        if let Some(process) = sample.process {
            lines.push(format!("Uptime:      {}", format_uptime(process.run_time)));
            lines.push(format!(
                "Process:     {:.1}% cpu, {} memory",
                process.cpu_percent,
                format_bytes(process.memory_bytes)
            ));
        }
        lines.push(format!("Updates:     {}", self.updates));
        lines.push(String::new());

        lines.push(format!(
            "CPU:         {} {:5.1}%  {}",
            bar(sample.cpu_percent),
            sample.cpu_percent,
            self.cpu_level()
        ));
        if !sample.per_core.is_empty() {
            let cores: Vec<String> = sample
                .per_core
                .iter()
                .take(4)
                .map(|core| format!("{core:4.0}%"))
                .collect();
            lines.push(format!("  cores:     {}", cores.join("  ")));
        }
        if self.cpu_trend.len() > 1 {
            lines.push(format!("  trend:     {}", self.cpu_trend.sparkline()));
        }

        lines.push(format!(
            "Memory:      {} {:5.1}%  {}",
            bar(sample.memory_percent()),
            sample.memory_percent(),
            self.memory_level()
        ));
        lines.push(format!(
            "  used:      {} of {}",
            format_bytes(sample.memory_used),
            format_bytes(sample.memory_total)
        ));
        if self.memory_trend.len() > 1 {
            lines.push(format!("  trend:     {}", self.memory_trend.sparkline()));
        }

        if let Some(disk) = sample.disk {
            lines.push(format!(
                "Disk:        {} {:5.1}%",
                bar(disk.used_percent()),
                disk.used_percent()
            ));
            lines.push(format!(
                "  free:      {} of {}",
                format_bytes(disk.available_bytes),
                format_bytes(disk.total_bytes)
            ));
        }
        lines.push(format!(
            "Network:     {} sent, {} received",
            format_bytes(sample.network_sent),
            format_bytes(sample.network_received)
        ));
        lines
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEnd {
    /// The run-state marker was removed by a stop.
    MarkerRemoved,
    ProcessGone,
}

pub struct HealthMonitor<P> {
    server: String,
    pid: u32,
    marker: PathBuf,
    sampler: P,
    interval: Duration,
    cpu_trend: Trend,
    memory_trend: Trend,
    updates: u64,
}

impl<P: ResourceSampler> HealthMonitor<P> {
    pub fn new(server: &str, pid: u32, marker: &Path, sampler: P, interval: Duration) -> Self {
        Self {
            server: server.to_string(),
            pid,
            marker: marker.to_path_buf(),
            sampler,
            interval,
            cpu_trend: Trend::default(),
            memory_trend: Trend::default(),
            updates: 0,
        }
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Samples every interval and hands each report to `render` until the
    /// server stops or `render` fails.
    pub async fn run<F>(&mut self, mut render: F) -> Result<MonitorEnd>
    where
        F: FnMut(&HealthReport<'_>) -> Result<()>,
    {
        loop {
            if !self.marker.exists() {
                debug!("run state of {} removed, ending monitor", self.server);
                return Ok(MonitorEnd::MarkerRemoved);
            }

            let sample = self.sampler.sample(self.pid);
            if sample.process.is_none() {
                debug!("pid {} of {} is gone, ending monitor", self.pid, self.server);
                return Ok(MonitorEnd::ProcessGone);
            }

            self.cpu_trend.push(sample.cpu_percent);
            self.memory_trend.push(sample.memory_percent());
            self.updates += 1;
            render(&HealthReport {
                server: &self.server,
                pid: self.pid,
                updates: self.updates,
                sample: &sample,
                cpu_trend: &self.cpu_trend,
                memory_trend: &self.memory_trend,
            })?;

            sleep(self.interval).await;
        }
    }
}

fn percent(part: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64 * 100.0) as f32
    }
}

fn bar(percent: f32) -> String {
    const WIDTH: usize = 30;
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * WIDTH as f32) as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(WIDTH - filled))
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} PB")
}

pub fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

use std::io::{self, IsTerminal, Write};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use crossterm::cursor;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};

use crate::config::AppConfig;
use crate::errors::CraftError;
use crate::health::{format_uptime, HealthMonitor, HealthReport, MonitorEnd, SystemSampler};

use super::common::supervisor;

pub(crate) async fn run(config: &AppConfig, name: String) -> Result<()> {
    let status = supervisor(config).status(&name)?;
    if !status.state.is_running() {
        return Err(CraftError::NotRunning(name).into());
    }
    let Some(pid) = status.pid else {
        bail!("{name} is running but its process could not be found");
    };

    let paths = config.server_paths(&name);
    let mut monitor = HealthMonitor::new(
        &name,
        pid,
        &paths.marker,
        SystemSampler::new(&paths.dir),
        config.timings.monitor_interval,
    );
    let interactive = io::stdout().is_terminal();
    let started = Instant::now();

    let end = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        result = monitor.run(|report| draw(report, interactive)) => Some(result?),
    };

    println!();
    match end {
        Some(MonitorEnd::MarkerRemoved) => println!("{name} was stopped."),
        Some(MonitorEnd::ProcessGone) => println!("{name} (pid {pid}) exited."),
        None => {}
    }
    println!(
        "Monitor ended after {} updates over {}.",
        monitor.updates(),
        format_uptime(started.elapsed())
    );

    Ok(())
}

fn draw(report: &HealthReport<'_>, interactive: bool) -> Result<()> {
    let mut out = io::stdout().lock();
    if interactive {
        execute!(out, cursor::MoveTo(0, 0), Clear(ClearType::All))
            .context("failed clearing terminal frame")?;
    } else {
        writeln!(out)?;
    }
    for line in report.lines() {
        writeln!(out, "{line}")?;
    }
    if interactive {
        writeln!(out, "\nPress Ctrl-C to exit.")?;
    }
    out.flush().context("failed flushing monitor frame")
}

//! Lifecycle notifications.
//!
//! The supervisor reports what happened to a server as a [`LifecycleEvent`];
//! sinks decide where it goes (the log, a Discord webhook, or both).

use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::server::ServerType;

const FOOTER: &str = concat!("craftmgr v", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Created {
        server: String,
        server_type: ServerType,
        version: Option<String>,
    },
    Started {
        server: String,
        server_type: ServerType,
        port: u16,
        pid: Option<u32>,
    },
    Stopped {
        server: String,
    },
    /// A marker pointed at a process that is no longer alive.
    Crashed {
        server: String,
    },
    Deleted {
        server: String,
    },
}

impl LifecycleEvent {
    pub fn server(&self) -> &str {
        match self {
            LifecycleEvent::Created { server, .. }
            | LifecycleEvent::Started { server, .. }
            | LifecycleEvent::Stopped { server }
            | LifecycleEvent::Crashed { server }
            | LifecycleEvent::Deleted { server } => server,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            LifecycleEvent::Created { .. } => "New Server Created",
            LifecycleEvent::Started { .. } => "Server Started",
            LifecycleEvent::Stopped { .. } => "Server Stopped",
            LifecycleEvent::Crashed { .. } => "Server Crashed",
            LifecycleEvent::Deleted { .. } => "Server Deleted",
        }
    }

    pub fn colour(&self) -> u32 {
        match self {
            LifecycleEvent::Created { .. } => 5_763_719,
            LifecycleEvent::Started { .. } => 3_066_993,
            LifecycleEvent::Stopped { .. } => 16_776_960,
            LifecycleEvent::Crashed { .. } => 15_158_332,
            LifecycleEvent::Deleted { .. } => 10_038_562,
        }
    }

    pub fn description(&self) -> String {
        match self {
            LifecycleEvent::Created {
                server,
                server_type,
                version,
            } => format!(
                "**Server:** {server}\n**Type:** {}\n**Version:** {}\n**Status:** Server created successfully",
                server_type.to_string().to_uppercase(),
                version.as_deref().unwrap_or("unknown")
            ),
            LifecycleEvent::Started {
                server,
                server_type,
                port,
                ..
            } => format!(
                "**Server:** {server}\n**Type:** {}\n**Port:** {port}\n**Status:** Online and ready for players",
                server_type.to_string().to_uppercase()
            ),
            LifecycleEvent::Stopped { server } => {
                format!("**Server:** {server}\n**Status:** Server has been shut down")
            }
            LifecycleEvent::Crashed { server } => format!(
                "**Server:** {server}\n**Status:** Server stopped without being asked to"
            ),
            LifecycleEvent::Deleted { server } => {
                format!("**Server:** {server}\n**Status:** Server has been permanently deleted")
            }
        }
    }

    /// Discord webhook payload with a single embed.
    pub fn to_discord_payload(&self) -> serde_json::Value {
        json!({
            "embeds": [{
                "title": self.title(),
                "description": self.description(),
                "color": self.colour(),
                "footer": { "text": FOOTER },
            }]
        })
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: LifecycleEvent) {
        match &event {
            LifecycleEvent::Crashed { server } => {
                warn!("server {server} is no longer running (crashed or killed externally)")
            }
            LifecycleEvent::Started {
                server,
                pid: Some(pid),
                ..
            } => info!("server {server} started (pid {pid})"),
            LifecycleEvent::Started {
                server, pid: None, ..
            } => info!("server {server} started (pid unknown)"),
            other => info!("{}: {}", other.title(), other.server()),
        }
    }
}

/// Posts events to a Discord webhook through `curl`. Delivery is
/// fire-and-forget; failures are logged and never reach the caller.
#[derive(Debug, Clone)]
pub struct DiscordWebhookSink {
    url: Url,
}

impl DiscordWebhookSink {
    pub fn new(raw: &str) -> Result<Self> {
        Ok(Self {
            url: parse_webhook_url(raw)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn build_command(&self, payload: &serde_json::Value) -> Command {
        let mut command = Command::new("curl");
        command
            .arg("--fail")
            .arg("--silent")
            .arg("--show-error")
            .arg("--proto")
            .arg("=https")
            .arg("--max-time")
            .arg("5")
            .arg("--header")
            .arg("Content-Type: application/json")
            .arg("--data-binary")
            .arg(payload.to_string())
            .arg(self.url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }
}

impl EventSink for DiscordWebhookSink {
    fn emit(&self, event: LifecycleEvent) {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("no async runtime available, skipping webhook for {}", event.server());
            return;
        }

        let mut command = self.build_command(&event.to_discord_payload());
        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("curl is required for Discord notifications but is not available in PATH");
                return;
            }
            Err(err) => {
                warn!("failed to start curl for Discord notification: {err}");
                return;
            }
        };

        let server = event.server().to_string();
        tokio::spawn(async move {
            match child.wait_with_output().await {
                Ok(output) if output.status.success() => {
                    debug!("delivered Discord notification for {server}")
                }
                Ok(output) => warn!(
                    "Discord notification for {server} failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                Err(err) => warn!("Discord notification for {server} failed: {err}"),
            }
        });
    }
}

pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Always the log, plus the webhook when configured and valid.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingSink)];
        if config.notifications_enabled {
            if let Some(raw) = config.discord_webhook.as_deref() {
                match DiscordWebhookSink::new(raw) {
                    Ok(sink) => {
                        debug!(
                            "Discord notifications enabled via {}",
                            sink.url().host_str().unwrap_or("webhook")
                        );
                        sinks.push(Arc::new(sink));
                    }
                    Err(err) => warn!("ignoring Discord webhook: {err:#}"),
                }
            }
        }
        Self::new(sinks)
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: LifecycleEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

pub fn sink_from_config(config: &AppConfig) -> Arc<dyn EventSink> {
    let sinks = FanoutSink::from_config(config);
    debug!("{} lifecycle event sink(s) configured", sinks.sink_count());
    Arc::new(sinks)
}

fn parse_webhook_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).context("invalid Discord webhook URL")?;
    if url.scheme() != "https" {
        anyhow::bail!("Discord webhook must use an https:// URL");
    }
    if !url.username().is_empty() || url.password().is_some() {
        anyhow::bail!("Discord webhook URL must not include credentials");
    }
    if url.host().is_none() {
        anyhow::bail!("Discord webhook URL is missing host");
    }
    Ok(url)
}

//! # relay-agent
//!
//! Relay server binary: loads settings, initializes logging and metrics,
//! and serves the broadcast and stream endpoints until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{RelayServer, ServerConfig};
use relay_settings::RelaySettings;

/// Real-time relay server.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "Real-time broadcast and streaming relay")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Maximum concurrent connections (overrides settings).
    #[arg(long)]
    max_connections: Option<usize>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(max) = self.max_connections {
            settings.server.max_connections = max;
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(relay_settings::settings_path);
    let mut settings = relay_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    let _ = relay_logging::init_subscriber(&settings.logging);
    let metrics = relay_server::metrics::install_recorder();

    let config = ServerConfig::from(&settings);
    let server = RelayServer::new(config, Some(metrics));
    let (addr, handle) = server
        .listen()
        .await
        .context("Failed to bind server")?;

    tracing::info!(
        max_connections = settings.server.max_connections,
        "Relay listening on http://{addr}"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let report = server.initiate_shutdown();
    tracing::info!(
        stopped_sessions = report.stopped_sessions,
        closed_connections = report.closed_connections,
        "Connections closed"
    );
    if server.shutdown().drain(handle, None).await {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!("Shutdown finished with connections still draining");
    }
    Ok(())
}

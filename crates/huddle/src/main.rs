//! # huddle
//!
//! Chat relay binary. Loads configuration, sets up logging and metrics, and
//! serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use huddle_server::config::{ServerConfig, load_config};
use huddle_server::server::HuddleServer;

/// Huddle chat relay.
#[derive(Parser, Debug)]
#[command(name = "huddle", about = "WebSocket chat relay")]
struct Cli {
    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter when `RUST_LOG` is unset (overrides config).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Flags take precedence over file and environment.
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.log_json {
            config.log_json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let mut config = load_config(config_path.as_deref())
        .with_context(|| format!("Failed to load config from {config_path:?}"))?;
    cli.apply(&mut config);

    huddle_server::logging::init_subscriber(&config.log_level, config.log_json);
    let metrics_handle =
        huddle_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let server = HuddleServer::new(config, Some(metrics_handle));
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Huddle listening on http://{addr} (chat at /, websocket at /ws?name=...)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !server.graceful_shutdown().await {
        tracing::warn!("some sessions did not close before the timeout");
    }
    let _ = handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_config_alone() {
        let cli = Cli::parse_from(["huddle"]);
        let mut config = ServerConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn cli_flags_override() {
        let cli = Cli::parse_from([
            "huddle",
            "--host",
            "0.0.0.0",
            "--port",
            "9001",
            "--log-level",
            "debug",
            "--log-json",
        ]);
        let mut config = ServerConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9001);
        assert_eq!(config.log_level, "debug");
        assert!(config.log_json);
    }

    #[test]
    fn cli_accepts_config_path() {
        let cli = Cli::parse_from(["huddle", "--config", "/etc/huddle.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/huddle.json")));
    }
}

//! Switchboard Daemon - Turn Routing Server
//!
//! Entry point for the switchboard daemon. It loads configuration, wires the
//! specialists to the chat-model backend, and serves an OpenAI-compatible
//! HTTP API that routes every turn to one specialist.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (~/.config/switchboard/switchboard.toml if present)
//! switchboard-daemon
//!
//! # Custom listen address and classifier model
//! switchboard-daemon --listen 0.0.0.0:8080 --route-model qwen3:4b
//!
//! # With config file
//! switchboard-daemon --config /etc/switchboard/switchboard.toml
//!
//! # Verbose logging
//! RUST_LOG=debug switchboard-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod request;
mod server;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use switchboard_core::config::default_config_path;
use switchboard_core::{load_config_from_path, ConfigOverrides};

use server::AppState;

/// Switchboard Daemon - routes chat turns to specialist agents
#[derive(Parser, Debug)]
#[command(name = "switchboard-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "SWITCHBOARD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(short = 'L', long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Classifier model used for routing
    #[arg(long, value_name = "MODEL")]
    route_model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "SWITCHBOARD_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(listen) = self.listen {
            overrides = overrides.with_listen(listen);
        }
        if let Some(ref model) = self.route_model {
            overrides = overrides.with_route_model(model.clone());
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "switchboard_daemon={level},switchboard_core={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %config.source(),
        config_file = ?config.config_file_path,
        route_model = %config.router.model,
        "Starting switchboard daemon"
    );

    let state = AppState::from_config(&config)?;
    if !state.backend.health_check().await {
        warn!(
            backend = %state.backend.endpoint(),
            "LLM backend not reachable yet; requests will fail until it is"
        );
    }

    server::serve(&config, state, shutdown_signal()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_become_overrides() {
        let args = Args::parse_from([
            "switchboard-daemon",
            "--listen",
            "127.0.0.1:9999",
            "--route-model",
            "tiny-router",
        ]);
        let overrides = args.overrides();
        assert_eq!(overrides.listen, Some("127.0.0.1:9999".parse().unwrap()));
        assert_eq!(overrides.route_model.as_deref(), Some("tiny-router"));
    }

    #[test]
    fn test_no_flags_no_overrides() {
        let args = Args::parse_from(["switchboard-daemon"]);
        let overrides = args.overrides();
        assert!(overrides.listen.is_none());
        assert!(overrides.route_model.is_none());
    }
}

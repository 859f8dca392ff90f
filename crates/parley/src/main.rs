//! # parley
//!
//! Presence/relay server binary. Parses configuration, installs logging and
//! metrics, then serves until ctrl-c.

#![deny(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::logging::{self, LogFormat};
use parley_server::config::ServerConfig;
use parley_server::server;

/// parley presence/relay server.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Real-time presence and message relay over WebSocket")]
struct Cli {
    /// Host to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Default log filter. `RUST_LOG` takes precedence.
    #[arg(long, env = "PARLEY_LOG", default_value = "info")]
    log_level: String,

    /// Log line format: `compact` or `json`.
    #[arg(long, env = "PARLEY_LOG_FORMAT", default_value = "compact")]
    log_format: LogFormat,

    /// Per-connection outbound queue depth.
    #[arg(long, env = "PARLEY_MAX_SEND_QUEUE", default_value = "1024")]
    max_send_queue: usize,

    /// Seconds to wait for tasks on shutdown.
    #[arg(long, env = "PARLEY_SHUTDOWN_TIMEOUT", default_value = "10")]
    shutdown_timeout: u64,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            max_send_queue: self.max_send_queue,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    logging::init_subscriber(&args.log_level, args.log_format);

    let metrics =
        parley_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    let config = args.server_config();
    let handle = server::start(config, Some(metrics))
        .await
        .with_context(|| format!("Failed to bind {}:{}", args.host, args.port))?;
    tracing::info!(addr = %handle.local_addr(), "listening on {}", handle.port());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    if !handle
        .shutdown(Some(Duration::from_secs(args.shutdown_timeout)))
        .await
    {
        tracing::warn!("forced shutdown");
    }
    Ok(())
}

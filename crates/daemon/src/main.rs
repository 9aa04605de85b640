// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! latchd - the latch lock server daemon
//!
//! Accepts TCP connections and serves keyed leases out of process memory.
//! Locks are not persisted; a restart loses all of them.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use latch_daemon::config::{LoggingConfig, ServerConfig, DEFAULT_PORT};
use latch_daemon::server::{self, ServerState};
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "latchd")]
#[command(about = "Latch lock server")]
#[command(version)]
struct Args {
    /// Port to listen on (ignored when the config file sets one)
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log to stdout regardless of the config's log destination
    #[arg(short = 'l', long)]
    log_local: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if config.port == 0 {
        config.port = args.port;
    }
    if args.log_local {
        config.logging.to.clear();
    }

    let _log_guard = setup_logging(&config.logging)?;

    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "latchd server available");

    let state = Arc::new(ServerState::new(config));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => server::spawn_connection(Arc::clone(&state), stream, peer),
                    Err(e) => error!("error accepting connection: {}", e),
                }
            }

            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }

            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
        }
    }

    info!("Daemon stopped");
    Ok(())
}

fn setup_logging(
    config: &LoggingConfig,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if config.level.is_empty() {
        "info"
    } else {
        config.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.to.is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
        return Ok(None);
    }

    let path = PathBuf::from(&config.to);
    let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("log destination has no file name: {}", config.to))?;
    std::fs::create_dir_all(directory)?;

    let file_appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(Some(guard))
}

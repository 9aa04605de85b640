// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! latch - command-line client for a latchd fleet

use std::time::Duration;

use clap::{Parser, Subcommand};
use latch_client::{Client, ClientConfig};

#[derive(Parser)]
#[command(name = "latch")]
#[command(about = "Latch - distributed lock client")]
#[command(version)]
struct Cli {
    /// Comma-separated server endpoints (host:port)
    #[arg(long, value_delimiter = ',', required = true)]
    servers: Vec<String>,

    /// Username for an authenticated fleet
    #[arg(long, requires = "password")]
    username: Option<String>,

    /// Password for an authenticated fleet
    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Idle connections kept per endpoint
    #[arg(long, default_value_t = latch_client::DEFAULT_POOL_SIZE)]
    pool_size: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check which servers answer PING
    Ping,
    /// Acquire a lease on a key and print its fencing id
    Lock {
        key: String,
        /// Auto-release timeout in milliseconds (0 = hold forever)
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,
        /// Semaphore capacity for the key
        #[arg(long, default_value_t = 1)]
        capacity: i64,
    },
    /// Release a lease by key and fencing id
    Unlock { key: String, id: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let servers = cli.servers.clone();

    let mut config = ClientConfig::new(cli.servers).with_pool_size(cli.pool_size);
    if let (Some(username), Some(password)) = (cli.username, cli.password) {
        config = config.with_credentials(username, password);
    }
    let client = Client::connect(config).await;

    match cli.command {
        Commands::Ping => {
            for endpoint in servers {
                match client.ping(&endpoint).await {
                    Ok(()) => println!("{}: ok", endpoint),
                    Err(e) => println!("{}: {}", endpoint, e),
                }
            }
        }

        Commands::Lock {
            key,
            timeout_ms,
            capacity,
        } => {
            let id = client
                .lock_sized(&key, capacity, Duration::from_millis(timeout_ms))
                .await?;
            println!("{}", id);
        }

        Commands::Unlock { key, id } => {
            if client.unlock(&key, id).await? {
                println!("unlocked");
            } else {
                println!("not unlocked");
            }
        }
    }

    Ok(())
}

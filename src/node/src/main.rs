//! DepChain Replica - Main Binary
//!
//! Runs one replica of a statically configured DepChain membership:
//! authenticated UDP links to every peer, epoch consensus and a file ledger.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depchain_crypto::ReplicaKeyPair;
use depchain_node::{NodeConfig, ReplicaNode};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

/// DepChain replica CLI
#[derive(Parser)]
#[command(name = "depchain-node")]
#[command(about = "DepChain replica - Byzantine fault tolerant replicated ledger")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/depchain/node.toml", env = "DEPCHAIN_CONFIG")]
    config: PathBuf,

    /// Replica id (overrides config)
    #[arg(long, env = "REPLICA_ID")]
    replica_id: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show node version
    Version,

    /// Generate a replica key pair
    Keygen {
        /// Replica id; names the `<id>.key` and `<id>.pub` files
        #[arg(long)]
        id: String,

        /// Output directory for keys
        #[arg(short, long, default_value = "./keys")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(true)
        .with_line_number(true)
        .init();

    if let Some(cmd) = cli.command {
        match cmd {
            Command::Version => {
                println!("DepChain node v{}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            Command::Keygen { id, output } => {
                generate_keypair(&id, output)?;
                return Ok(());
            }
        }
    }

    info!("Starting DepChain node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = NodeConfig::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    if let Some(replica_id) = cli.replica_id {
        config.node.id = replica_id;
    }
    config.validate()?;

    let node = ReplicaNode::new(config).await?;

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                error!("Node error: {}", e);
                return Err(e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal (Ctrl+C)");
            node.shutdown().await?;
        }
        result = shutdown_signal() => {
            result?;
            info!("Received shutdown signal (SIGTERM)");
            node.shutdown().await?;
        }
    }

    info!("Node stopped gracefully");
    Ok(())
}

/// Write `<id>.key` (secret, hex) and `<id>.pub` (public, hex)
fn generate_keypair(id: &str, output_dir: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {:?}", output_dir))?;

    let keys = ReplicaKeyPair::generate();
    let secret_path = output_dir.join(format!("{}.key", id));
    let public_path = output_dir.join(format!("{}.pub", id));

    std::fs::write(&secret_path, keys.secret_key_hex())?;
    std::fs::write(&public_path, keys.public_key_hex())?;

    info!("Key pair generated for '{}':", id);
    info!("  Secret key: {:?}", secret_path);
    info!("  Public key: {:?} ({})", public_path, keys.public_key_hex());

    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    // Only Ctrl+C on other platforms
    std::future::pending::<()>().await;
    Ok(())
}

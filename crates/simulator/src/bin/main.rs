//! protosim
//!
//! Registers a simulated cluster and serves it until interrupted.
//!
//! # Example
//!
//! ```bash
//! # Two data centers of three nodes on 127.0.1.1:9042, 127.0.1.2:9042, ...
//! protosim --dcs 3,3
//!
//! # One port per node on a single IP, from a config file
//! protosim --config protosim.toml --resolver node-per-port
//! ```

use anyhow::Result;
use clap::Parser;
use protosim_server::ResolverPolicy;
use protosim_simulator::{Simulator, SimulatorConfig};
use std::path::PathBuf;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Native-protocol cluster simulator
#[derive(Parser, Debug)]
#[command(name = "protosim")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Nodes per data center, comma separated (overrides config)
    #[arg(long, value_delimiter = ',')]
    dcs: Vec<usize>,

    /// Per-node bind timeout in milliseconds (overrides config)
    #[arg(long)]
    bind_timeout_ms: Option<u64>,

    /// Address resolution policy (overrides config)
    #[arg(long, value_enum)]
    resolver: Option<ResolverPolicy>,

    /// Supported protocol versions, comma separated (overrides config)
    #[arg(long, value_delimiter = ',')]
    protocol_versions: Vec<u8>,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn apply_overrides(config: &mut SimulatorConfig, cli: &Cli) {
    if !cli.dcs.is_empty() {
        config.cluster.data_centers = cli.dcs.clone();
    }
    if let Some(ms) = cli.bind_timeout_ms {
        config.server.bind_timeout_ms = ms;
    }
    if let Some(policy) = cli.resolver {
        config.resolver.policy = policy;
    }
    if !cli.protocol_versions.is_empty() {
        config.server.protocol_versions = cli.protocol_versions.clone();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => SimulatorConfig::load(path)?,
        None => SimulatorConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    let simulator = Simulator::start(&config).await?;
    info!("Simulator started, press Ctrl+C to stop");

    shutdown_signal().await;

    info!("Shutting down...");
    simulator.stop().await?;
    Ok(())
}

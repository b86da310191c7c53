use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use keywarden::admission::{AdmissionEngine, AdmissionPolicy};
use keywarden::clock::SystemClock;
use keywarden::config::KeywardenConfig;
use keywarden::store::MemoryStore;
use keywarden::sweep::Sweeper;

#[derive(Debug, Parser)]
#[command(name = "keywarden", about = "Per-key request admission service")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Keywarden Admission Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = match args.config {
        Some(path) => KeywardenConfig::from_file(path)?,
        None => KeywardenConfig::default(),
    };
    info!(
        window_secs = config.limiter.window_secs,
        blacklist_multiplier = config.limiter.blacklist_multiplier,
        sweep_interval_secs = config.sweep.interval_secs,
        "Configuration loaded"
    );

    // Initialize the admission engine over an in-memory key store
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(AdmissionEngine::new(
        store,
        AdmissionPolicy::from(&config.limiter),
    ));
    info!("Admission engine initialized");

    // Sweep expired blacklists once at startup, then on the configured interval
    let sweeper = Sweeper::new(
        engine,
        Arc::new(SystemClock),
        Duration::from_secs(config.sweep.interval_secs),
    );
    let sweep_task = sweeper.spawn();

    shutdown_signal().await;
    sweep_task.abort();

    info!("Keywarden Admission Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

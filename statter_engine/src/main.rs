//! Statter Uptime Monitor Binary

use clap::Parser;
use statter_engine::{Config, ProbeScheduler, Result, StorageBackend, open_store};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Probe HTTP services on a schedule and record every response
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the YAML or JSON configuration file
    #[arg(short, long, env = "STATTER_CONFIG", default_value = "statter.yaml")]
    config: PathBuf,

    /// Keep results in memory instead of the journal file
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let args = Args::parse();
    info!("Starting Statter Uptime Monitor v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration from {} is invalid: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };
    if args.memory {
        config.storage = StorageBackend::Memory;
    }

    info!(
        "Monitor configuration - Services: {}, Default interval: {}s, Storage: {:?}, Database: {}",
        config.services.len(),
        config.interval,
        config.storage,
        config.database_file.display()
    );

    let store = open_store(&config).await?;
    let scheduler = ProbeScheduler::from_config(Arc::new(config), store)?;

    let report = scheduler.run_until_shutdown().await?;
    info!(
        "Monitor exited cleanly ({} drained, {} aborted)",
        report.drained, report.aborted
    );

    Ok(())
}

/// Initialize structured logging
fn initialize_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

//! Peer Map Aggregation Proxy
//!
//! Periodically discovers network peers from the directory service, enriches
//! each one with ledger (economic activity) and geolocation data, merges the
//! result into per-geo-bucket aggregates, and serves the latest complete
//! aggregate as JSON over HTTP.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         PEERMAP                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scheduler            ──▶ one refresh at startup + per tick │
//! │  Aggregator           ──▶ directory + ledger + geoip merge  │
//! │  Snapshot Cache       ──▶ atomic publish, lock-free reads   │
//! │  HTTP API (8090)      ──▶ map JSON, status, metrics         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Readers always see a complete snapshot: the cache swaps one pointer per
//! refresh, and a failed refresh leaves the previous snapshot serving.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod aggregator;
mod api;
mod clients;
mod config;
mod geo;
mod scheduler;
mod snapshot;
mod types;

use aggregator::Aggregator;
use api::Metrics;
use clients::{HttpLedgerClient, HttpPeerDirectory, MaxMindResolver};
use config::MapConfig;
use scheduler::Scheduler;
use snapshot::SnapshotCache;

/// Peer map aggregation proxy
#[derive(Parser, Debug)]
#[command(name = "peermap")]
#[command(version = "0.1.0")]
#[command(about = "Aggregates peer, ledger and geolocation data into a map snapshot", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "peermap.toml")]
    config: PathBuf,

    /// Path to the GeoIP city database
    #[arg(long)]
    geoip_db: Option<PathBuf>,

    /// Base URL of the peer directory service
    #[arg(long)]
    directory_url: Option<String>,

    /// Base URL of the economic ledger service
    #[arg(long)]
    ledger_url: Option<String>,

    /// Refresh interval in seconds
    #[arg(long)]
    refresh_interval: Option<u64>,

    /// HTTP API port
    #[arg(long, default_value = "8090")]
    api_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();

    info!("peermap v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if args.config.exists() {
        MapConfig::load(&args.config)?
    } else {
        warn!("config file not found, using defaults");
        MapConfig::default()
    };

    // Override config with CLI args
    let config = config
        .with_geoip_db(args.geoip_db)
        .with_directory_url(args.directory_url)
        .with_ledger_url(args.ledger_url)
        .with_refresh_interval(args.refresh_interval)
        .with_api_port(args.api_port);

    config.validate()?;

    info!("configuration:");
    info!("   directory: {}", config.directory_url);
    info!("   ledger: {}", config.ledger_url);
    info!("   geoip database: {:?}", config.geoip_db);
    info!("   refresh interval: {}s", config.refresh_interval_secs);
    info!("   api port: {}", config.api_port);

    let config = Arc::new(config);

    // Wire up the collaborators. A missing geo database is fatal: every peer
    // would be unmappable and there would be nothing to serve.
    let http = reqwest::Client::builder().build()?;
    let directory = Arc::new(HttpPeerDirectory::new(http.clone(), config.directory_url.clone()));
    let ledger = Arc::new(HttpLedgerClient::new(http, config.ledger_url.clone()));
    let geo = Arc::new(MaxMindResolver::open(&config.geoip_db)?);
    info!("geoip database opened at {:?}", config.geoip_db);

    let cache = Arc::new(SnapshotCache::new());
    let metrics = Arc::new(Metrics::new());

    let aggregator = Arc::new(Aggregator::new(
        directory,
        ledger,
        geo,
        config.clone(),
        metrics.clone(),
    ));
    let scheduler = Scheduler::new(aggregator, cache.clone(), config.clone(), metrics.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_handle = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    let api_handle = tokio::spawn(api::run_api_server(
        config.clone(),
        cache,
        metrics,
        shutdown_rx,
    ));

    info!("all services started, press Ctrl+C to shut down");

    // The scheduler exiting early means the startup refresh failed; that is
    // fatal. The API server exiting early is fatal too (bind failure).
    let exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
        result = scheduler_handle => {
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("scheduler exited: {:#}", e);
                    Err(e)
                }
                Err(e) => Err(anyhow::anyhow!("scheduler task panicked: {}", e)),
            }
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => {
                    error!("HTTP API exited: {:#}", e);
                    Err(e)
                }
                Err(e) => Err(anyhow::anyhow!("api task panicked: {}", e)),
            }
        }
    };

    // Stop the remaining tasks; in-flight refresh work is discarded.
    let _ = shutdown_tx.send(true);

    info!("peermap shutting down");
    exit
}

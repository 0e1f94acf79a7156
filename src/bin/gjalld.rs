//! gjalld — Gjallarhorn datafile manager daemon.
//!
//! Owns the authoritative datafile cache, serves the refresh HTTP
//! surface, and fans changes out to WebSocket subscribers.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gjallarhorn::config::Config;
use gjallarhorn::server::{self, AppState};
use gjallarhorn::{ActiveKeySet, DatafileCache, EventBus, HttpFetcher, RefreshCoordinator};

/// Gjallarhorn datafile manager daemon.
#[derive(Parser)]
#[command(name = "gjalld")]
#[command(version)]
#[command(about = "Gjallarhorn datafile manager daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Override the bind address from the config file.
    #[arg(long)]
    address: Option<String>,

    /// SDK key to register and fetch at startup (repeatable; overrides
    /// the config file).
    #[arg(long = "sdk-key", value_name = "KEY")]
    sdk_keys: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    let mut manager = config.manager;
    if let Some(address) = args.address {
        manager.address = address;
    }
    if !args.sdk_keys.is_empty() {
        manager.sdk_keys = args.sdk_keys;
    }

    let cache = Arc::new(DatafileCache::new());
    let active = Arc::new(ActiveKeySet::new());
    let bus = EventBus::new(256);
    let fetcher = Arc::new(HttpFetcher::new(&manager.origin_template));
    let coordinator = Arc::new(
        RefreshCoordinator::new(
            Arc::clone(&cache),
            Arc::clone(&active),
            fetcher,
            bus.clone(),
        )
        .fetch_timeout(manager.fetch_timeout()),
    );

    // Keys configured at boot are cached and pushed before the first
    // subscriber connects.
    if !manager.sdk_keys.is_empty() {
        let report = coordinator.full_refresh(manager.sdk_keys.clone()).await;
        for (key, error) in report.failed() {
            warn!(key, error, "startup refresh failed");
        }
    }

    if let Some(interval) = manager.refresh_interval() {
        info!(?interval, "periodic refresh enabled");
        coordinator.spawn_periodic(interval);
    }

    let state = AppState::new(cache, active, coordinator, bus).probe_interval(
        manager.probe_interval(),
    );
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&manager.address).await?;
    info!(address = %manager.address, version = env!("CARGO_PKG_VERSION"), "gjalld listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// =============================================================================
// kumo-watch — Main Entry Point
// =============================================================================
//
// Live hourly candle watcher for a single instrument: seeds a candle cache
// from the exchange, polls the ticker, derives the cloud overlay, and streams
// incremental updates to WebSocket subscribers.

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod broadcast;
mod coinbase;
mod crawler;
mod error;
mod market_data;
mod overlay;
mod runtime_config;
mod watcher;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::runtime_config::WatchConfig;
use crate::watcher::Watcher;

const CONFIG_PATH: &str = "watch_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = WatchConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        WatchConfig::default()
    });

    if let Ok(addr) = std::env::var("KUMO_BIND_ADDR") {
        config.bind_addr = addr;
    }
    if let Ok(product) = std::env::var("KUMO_PRODUCT_ID") {
        config.product_id = product.trim().to_uppercase();
    }

    info!(
        product = %config.product_id,
        poll_interval_ms = config.poll_interval_ms,
        seed = config.seed_candle_count,
        "kumo-watch starting"
    );

    // ── 2. Build and start the watcher ───────────────────────────────────
    let watcher = Arc::new(Watcher::new(config.clone()));

    // Fatal when the historical seed fetch fails: there is nothing to serve.
    watcher.start().await?;

    // ── 3. Start the API server ──────────────────────────────────────────
    let api_watcher = watcher.clone();
    let bind_addr = config.bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_watcher);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("all subsystems running, press Ctrl+C to stop");

    // ── 4. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    watcher.stop().await;

    if let Err(e) = config.save(CONFIG_PATH) {
        warn!(error = %e, "failed to save watch config on shutdown");
    }

    info!("kumo-watch shut down complete");
    Ok(())
}

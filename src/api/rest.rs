// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Everything is public read-only market
// data, so there is no authentication.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::watcher::Watcher;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(watcher: Arc<Watcher>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/candles", get(candles))
        .route("/api/v1/overlay", get(overlay))
        // ── WebSocket (handled in the ws module but mounted here) ────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(watcher)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    lifecycle: String,
    product: String,
    candles: usize,
    subscribers: usize,
    server_time: i64,
}

async fn health(State(watcher): State<Arc<Watcher>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        lifecycle: watcher.lifecycle().to_string(),
        product: watcher.config.product_id.clone(),
        candles: watcher.snapshot_candles().len(),
        subscribers: watcher.subscriber_count(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Snapshots
// =============================================================================

/// The contiguous candle run plus the open candle, oldest-first.
async fn candles(State(watcher): State<Arc<Watcher>>) -> impl IntoResponse {
    Json(watcher.snapshot_candles())
}

/// The last computed cloud overlay; `null` until the first tick after the
/// series reaches the 52-candle minimum.
async fn overlay(State(watcher): State<Arc<Watcher>>) -> impl IntoResponse {
    Json(watcher.snapshot_overlay())
}

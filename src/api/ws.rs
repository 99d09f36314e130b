// =============================================================================
// WebSocket Handler — streaming overlay updates
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive:
//   1. An immediate full snapshot frame (candles + overlay) on connect, so a
//      late joiner never observes a gap between initial state and the first
//      streamed update.
//   2. One frame per Update drained from this connection's own bounded
//      delivery queue.
//
// The handler also responds to Ping frames with Pong frames and unsubscribes
// on disconnect. A connection arriving while the subscriber set is at its
// limit is rejected before the upgrade.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::broadcast::Subscription;
use crate::watcher::Watcher;

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request.
///
/// The subscription is claimed before upgrading so a capacity rejection is a
/// plain HTTP error rather than an immediately-closed socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(watcher): State<Arc<Watcher>>,
) -> impl IntoResponse {
    match watcher.subscribe() {
        Ok(subscription) => {
            info!(id = %subscription.id(), "WebSocket connection accepted — upgrading");
            ws.on_upgrade(move |socket| handle_ws_connection(socket, watcher, subscription))
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "WebSocket connection rejected");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle.
///
/// Runs two concurrent arms via `tokio::select!`:
///   1. **Push** — forward each Update from this connection's queue.
///   2. **Recv** — process incoming client messages (Ping, Close).
async fn handle_ws_connection(
    socket: WebSocket,
    watcher: Arc<Watcher>,
    mut subscription: Subscription,
) {
    let id = subscription.id();
    let (mut sender, mut receiver) = socket.split();

    // Initial snapshot so the client has full state before the first delta.
    let snapshot = serde_json::json!({
        "type": "snapshot",
        "candles": watcher.snapshot_candles(),
        "overlay": watcher.snapshot_overlay(),
    });
    if let Err(e) = send_json(&mut sender, &snapshot).await {
        warn!(%id, error = %e, "failed to send initial WebSocket snapshot");
        watcher.unsubscribe(id);
        return;
    }

    loop {
        tokio::select! {
            // ── Push: drain this subscriber's delivery queue ─────────────
            update = subscription.next_update() => {
                let Some(update) = update else {
                    debug!(%id, "subscription queue closed");
                    break;
                };
                let frame = serde_json::json!({
                    "type": "update",
                    "update": update,
                });
                if let Err(e) = send_json(&mut sender, &frame).await {
                    debug!(%id, error = %e, "WebSocket send failed — disconnecting");
                    break;
                }
            }

            // ── Recv: process incoming messages ──────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(%id, error = %e, "failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(%id, "WebSocket Close frame received");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(%id, msg = %text, "WebSocket text message ignored");
                    }
                    Some(Ok(_)) => {
                        // Pong / binary frames need no action.
                    }
                    Some(Err(e)) => {
                        warn!(%id, error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!(%id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    watcher.unsubscribe(id);
    info!(%id, "WebSocket connection closed — cleanup complete");
}

// =============================================================================
// Helpers
// =============================================================================

async fn send_json<S>(sender: &mut S, value: &serde_json::Value) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let json = value.to_string();
    sender.send(Message::Text(json)).await
}

//! Telemetry and control surface
//!
//! HTTP JSON read model plus a WebSocket stream of sequence-numbered frames.
//! The API is a read-only observer over the live view and the store; the
//! only writes are the idempotent bot controls and config updates.

pub mod routes;
pub mod stream;

pub use routes::ApiContext;
pub use stream::EventBus;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub fn build_router(ctx: Arc<ApiContext>) -> Router {
    Router::new()
        .route("/", get(routes::root))
        .route("/api/opportunities", get(routes::get_opportunities))
        .route("/api/stats", get(routes::get_stats))
        .route("/api/stats/history", get(routes::get_stats_history))
        .route("/api/chains", get(routes::get_chains))
        .route("/api/executions", get(routes::get_executions))
        .route("/api/alerts", get(routes::get_alerts))
        .route("/api/alerts/:id/ack", post(routes::ack_alert))
        .route("/api/bot/start", post(routes::bot_start))
        .route("/api/bot/stop", post(routes::bot_stop))
        .route("/api/bot/arm", post(routes::bot_arm))
        .route("/api/bot/disarm", post(routes::bot_disarm))
        .route("/api/config", get(routes::get_config))
        .route("/api/config", put(routes::put_config))
        .route("/api/execute", post(routes::execute))
        .route("/ws", get(ws_handler))
        .with_state(ctx)
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Resume point: replay frames with seq greater than this.
    pub after: Option<u64>,
}

async fn ws_handler(
    State(ctx): State<Arc<ApiContext>>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let after = params.after.unwrap_or(0);
    ws.on_upgrade(move |socket| stream_frames(socket, ctx, after))
}

async fn stream_frames(mut socket: WebSocket, ctx: Arc<ApiContext>, after: u64) {
    let mut rx = ctx.app.events.subscribe();

    // Replay missed frames first so the client resumes where it left off.
    for frame in ctx.app.events.replay_after(after) {
        if let Ok(text) = serde_json::to_string(&frame) {
            if socket.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Ok(frame) => {
                        if let Ok(text) = serde_json::to_string(&frame) {
                            if socket.send(Message::Text(text)).await.is_err() {
                                return;
                            }
                        }
                    }
                    // A lagged subscriber missed frames; it can reconnect
                    // with ?after= to replay them.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(missed = n, "websocket subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return,
                }
            }
        }
    }
}

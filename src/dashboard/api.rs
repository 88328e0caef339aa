//! Dashboard HTTP API
//!
//! Latest price, snapshot stream and bot control.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use super::{status_for, ApiResponse, DashboardState};
use crate::types::UserId;

/// Create the API router with all endpoints
pub fn create_router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/price", get(get_price))
        .route("/api/bots", get(get_all_bots))
        .route("/api/bots/:user_id", get(get_bot))
        .route("/api/bots/:user_id/start", post(start_bot))
        .route("/api/bots/:user_id/stop", post(stop_bot))
        // WebSocket
        .route("/ws/price", get(price_stream_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// GET /api/price - Latest aggregated snapshot (timestamp 0 before the first)
async fn get_price(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.aggregator.latest()))
}

/// GET /api/bots - Every running bot
async fn get_all_bots(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.supervisor.status_all()))
}

/// GET /api/bots/:user_id
async fn get_bot(
    Path(user_id): Path<i64>,
    State(state): State<DashboardState>,
) -> impl IntoResponse {
    Json(ApiResponse::success(state.supervisor.status(UserId(user_id))))
}

/// POST /api/bots/:user_id/start
async fn start_bot(Path(user_id): Path<i64>, State(state): State<DashboardState>) -> Response {
    let user_id = UserId(user_id);
    match state.supervisor.start(user_id).await {
        Ok(()) => Json(ApiResponse::success(state.supervisor.status(user_id))).into_response(),
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "Bot start rejected");
            (status_for(&e), Json(ApiResponse::<()>::error(e.to_string()))).into_response()
        }
    }
}

/// POST /api/bots/:user_id/stop
async fn stop_bot(Path(user_id): Path<i64>, State(state): State<DashboardState>) -> Response {
    let user_id = UserId(user_id);
    match state.supervisor.stop(user_id).await {
        Ok(()) => Json(ApiResponse::success(state.supervisor.status(user_id))).into_response(),
        Err(e) => (status_for(&e), Json(ApiResponse::<()>::error(e.to_string()))).into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────
// WebSocket Handler
// ─────────────────────────────────────────────────────────────────

/// GET /ws/price - upgrade to a snapshot stream
async fn price_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<DashboardState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_price_stream(socket, state))
}

/// Outgoing message type for WebSocket
enum OutgoingMessage {
    Text(String),
    Pong(Vec<u8>),
}

/// Forward snapshots until either side goes away
async fn handle_price_stream(socket: WebSocket, state: DashboardState) {
    use futures_util::{SinkExt, StreamExt};

    tracing::info!("New price stream connection");

    let (mut sender, mut receiver) = socket.split();
    // queues the latest snapshot, if any, first
    let mut subscription = state.aggregator.subscribe();

    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<OutgoingMessage>(32);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let result = match msg {
                OutgoingMessage::Text(text) => sender.send(Message::Text(text)).await,
                OutgoingMessage::Pong(data) => sender.send(Message::Pong(data)).await,
            };
            if result.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            snapshot = subscription.recv() => {
                let Some(snapshot) = snapshot else { break };
                match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        if out_tx.send(OutgoingMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Failed to encode snapshot"),
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if out_tx.send(OutgoingMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received WebSocket message: {}", text);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }

    subscription.unsubscribe();
    send_task.abort();
    tracing::info!("Price stream connection closed");
}

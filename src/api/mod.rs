//! Read-only HTTP + WebSocket status surface over the inbox.

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::inbox::Inbox;
use crate::queue::QueueEvent;

/// Build the status router.
pub fn status_routes(inbox: Inbox) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/inbox/files", get(list_files))
        .route("/api/inbox/files/{hash}", get(get_file))
        .route("/api/inbox/stats", get(queue_stats))
        .route("/api/inbox/analytics", get(analytics))
        .layer(CorsLayer::permissive())
        .with_state(inbox)
}

// ── REST ────────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "inbox-engine"
    }))
}

/// GET /api/inbox/files
async fn list_files(State(inbox): State<Inbox>) -> impl IntoResponse {
    Json(inbox.all_files().await)
}

/// GET /api/inbox/files/{hash}
///
/// One record with its full action ledger, or 404.
async fn get_file(State(inbox): State<Inbox>, Path(hash): Path<String>) -> impl IntoResponse {
    match inbox.get_file(&hash).await {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Unknown file"})),
        )
            .into_response(),
    }
}

/// GET /api/inbox/stats
async fn queue_stats(State(inbox): State<Inbox>) -> impl IntoResponse {
    Json(serde_json::json!({
        "queue": inbox.queue_stats(),
        "media": inbox.media_stats(),
    }))
}

/// GET /api/inbox/analytics
async fn analytics(State(inbox): State<Inbox>) -> impl IntoResponse {
    Json(inbox.analytics().await)
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(inbox): State<Inbox>) -> impl IntoResponse {
    info!("Status client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, inbox))
}

async fn handle_socket(mut socket: WebSocket, inbox: Inbox) {
    let mut rx = inbox.subscribe();

    // Current stats first so the client has a baseline.
    if !send_event(&mut socket, &current_stats(&inbox)).await {
        warn!("Failed to send initial stats, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_event(&mut socket, &event).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "Status client lagged behind broadcast");
                        if !send_event(&mut socket, &current_stats(&inbox)).await {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Status client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    // read-only surface
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn current_stats(inbox: &Inbox) -> QueueEvent {
    QueueEvent::StatsUpdated {
        stats: inbox.queue_stats(),
    }
}

/// Returns `false` once the client is gone.
async fn send_event(socket: &mut WebSocket, event: &QueueEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize queue event");
            true
        }
    }
}

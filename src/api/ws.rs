//! Real-time monitor socket (`GET /ws/monitor`)
//!
//! Each connection owns one hub subscription. Outbound messages come from the
//! subscriber queue; inbound frames are only used for ping/close handling.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::handlers::AppState;
use super::types::ApiError;

/// Axum handler for WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let subscription = match state.engine.hub().subscribe() {
        Ok(sub) => sub,
        Err(err) => {
            warn!(code = err.code_str(), "Monitor WS: rejecting connection");
            if let Ok(json) = serde_json::to_string(&ApiError::from(&err)) {
                let _ = sender.send(Message::Text(json)).await;
            }
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let id = subscription.id();

    loop {
        tokio::select! {
            outbound = subscription.recv() => match outbound {
                Some(json) => {
                    if sender.send(Message::Text(json.to_string())).await.is_err() {
                        break;
                    }
                }
                // Evicted or hub closed
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },

            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Ping(data))) => {
                    if sender.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(subscriber = %id, error = %e, "Monitor WS: receive error");
                    break;
                }
                _ => {}
            },
        }
    }

    info!(
        subscriber = %id,
        connected_for_secs = (chrono::Utc::now() - subscription.connected_at()).num_seconds(),
        "Monitor WS: client disconnected"
    );
    // Dropping the subscription unregisters it
}

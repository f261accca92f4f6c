//! WebSocket endpoint
//!
//! Each connection gets a bounded outbound queue registered with the hub, a
//! writer that drains it into the socket and a reader that decodes inbound
//! frames and forwards them to the hub.

use axum::{
    Json,
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde_json::json;
use termdeck_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let active = state
        .hub
        .stats()
        .await
        .map(|s| s.active_terminals)
        .unwrap_or(0);
    Json(json!({ "status": "ok", "activeTerminals": active }))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.client_queue.max(1));

    let Some(conn) = state.hub.attach(tx).await else {
        info!("Rejecting connection during shutdown");
        let _ = ws_sender.send(away_frame()).await;
        return;
    };
    info!(conn = %conn, "WebSocket connected");

    // Task to send messages to WebSocket
    let sender_task = async move {
        while let Some(msg) = rx.recv().await {
            let json = match msg.encode() {
                Ok(j) => j,
                Err(e) => {
                    error!(conn = %conn, "Failed to serialize message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        // The hub dropped our queue: the server is going away.
        let _ = ws_sender.send(away_frame()).await;
        let _ = ws_sender.close().await;
    };

    // Task to handle incoming messages
    let hub = state.hub.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match ClientMessage::decode(text.as_str()) {
                    Ok(message) => {
                        if !hub.inbound(conn, message).await {
                            break;
                        }
                    }
                    Err(e) => warn!(conn = %conn, "Dropping malformed message: {}", e),
                },
                Ok(Message::Binary(_)) => debug!(conn = %conn, "Ignoring binary frame"),
                // Keep polling so the close reply is flushed; the stream ends after it.
                Ok(Message::Close(_)) => debug!(conn = %conn, "Client closed connection"),
                Err(e) => {
                    debug!(conn = %conn, "WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(conn = %conn, "Sender task ended"),
        _ = input_task => debug!(conn = %conn, "Input task ended"),
    }

    state.hub.detach(conn).await;
    info!(conn = %conn, "WebSocket disconnected");
}

fn away_frame() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: String::from("server shutting down").into(),
    }))
}

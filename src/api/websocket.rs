use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tracing::{debug, error, info};

use crate::api::state::AppState;
use crate::realtime::{Channel, ClientSession, Flow};

/// GET /ws/bids
pub async fn bids_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Channel::Bids))
}

/// GET /ws/notifications
pub async fn notifications_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Channel::Notifications))
}

/// Sockets open anonymous; the session authenticates from the first
/// `authenticate` frame.
async fn handle_socket(socket: WebSocket, state: AppState, channel: Channel) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut rx) = state.gateway.register();
    let mut session = ClientSession::new(
        channel,
        connection,
        state.gateway.clone(),
        state.identities.clone(),
        state.notifier.clone(),
    );
    info!(connection, ?channel, "websocket connection opened");

    // Forward this connection's queue in FIFO order
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize WebSocket message: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                if session.handle_text(&text).await == Flow::Close {
                    debug!(connection, "closing websocket after protocol violation");
                    break;
                }
            }
            Message::Close(_) => break,
            // Axum answers pings itself
            _ => {}
        }
    }

    // Unregistering drops the queue's sender so the send task drains and exits.
    drop(session);
    if let Err(e) = send_task.await {
        debug!(connection, "websocket send task ended abnormally: {}", e);
    }
    info!(connection, "websocket connection closed");
}

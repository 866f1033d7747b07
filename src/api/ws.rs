//! WebSocket subscribe endpoint bridging the room broadcaster.
//!
//! Each connection gets its own bounded event queue from the broadcaster;
//! serialization and sending happen entirely on the connection's task, so a
//! stalled socket never touches the engine's transition path. Disconnecting
//! drops the subscription and nothing is redelivered on reconnect — clients
//! re-sync with a plain `GET /rooms/{id}` read.

use super::handlers::AppState;
use crate::store::RoomStore;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// GET /rooms/{id}/ws
pub async fn room_ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    // Reject before upgrading when the room does not exist.
    if state.store.get_room(&room_id).await.is_err() {
        return (
            axum::http::StatusCode::NOT_FOUND,
            format!("room {} not found", room_id),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_connection(socket, room_id, state))
}

async fn handle_connection(socket: WebSocket, room_id: String, state: Arc<AppState>) {
    let subscription = state.broadcaster.subscribe(&room_id);
    let subscriber_id = subscription.id.clone();
    let mut events = subscription.receiver;
    info!(room_id = %room_id, subscriber = %subscriber_id, "observer connected");

    let (mut sender, mut receiver) = socket.split();

    let send_room = room_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let message = match serde_json::to_string(&event) {
                Ok(text) => Message::Text(text),
                Err(e) => {
                    warn!(room_id = %send_room, error = %e, "failed to serialize event");
                    continue;
                }
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let recv_room = room_id.clone();
    let receive_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(_) => {
                    // Observers are read-only; inbound payloads are ignored.
                }
                Err(e) => {
                    debug!(room_id = %recv_room, error = %e, "websocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {}
        _ = receive_task => {}
    }

    state.broadcaster.unsubscribe(&room_id, &subscriber_id);
    info!(room_id = %room_id, subscriber = %subscriber_id, "observer disconnected");
}

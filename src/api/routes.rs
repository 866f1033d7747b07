//! Route definitions: maps URLs to handlers with type-safe routing.

use super::{handlers::*, ws::room_ws_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check (high priority)
        .route("/health", get(health_handler))
        // Room lifecycle
        .route("/rooms", post(create_room_handler).get(list_rooms_handler))
        .route("/rooms/:room_id", get(room_state_handler))
        .route("/rooms/:room_id/join", post(join_handler))
        .route("/rooms/:room_id/leave", post(leave_handler))
        .route("/rooms/:room_id/start", post(start_handler))
        // Game actions and chat
        .route("/rooms/:room_id/actions", post(action_handler))
        .route("/rooms/:room_id/chat", post(chat_handler))
        // Event stream subscription
        .route("/rooms/:room_id/ws", get(room_ws_handler))
        // Attach shared state
        .with_state(state)
}

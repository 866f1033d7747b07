//! Request handlers: thin glue between the HTTP surface and the engine.

use super::{errors::ApiError, middleware::RequestId, models::*};
use crate::config::CardroomConfig;
use crate::engine::GameEngine;
use crate::errors::GameError;
use crate::events::Broadcaster;
use crate::store::RoomStore;
use axum::{
    extract::{Path, State},
    Extension, Json,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub engine: Arc<GameEngine>,
    pub store: Arc<dyn RoomStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub config: CardroomConfig,
}

fn map_err(request_id: &RequestId, error: GameError) -> ApiError {
    ApiError::from_game(request_id.0.clone(), error)
}

/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
    })
}

/// POST /rooms
pub async fn create_room_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<Json<RoomSummary>, ApiError> {
    let config = request.config.unwrap_or_else(|| state.config.game.clone());
    let room = state
        .engine
        .create_room(&request.user_id, &request.game_mode, config)
        .await
        .map_err(|e| map_err(&request_id, e))?;
    Ok(Json(room_summary(&room, 1)))
}

/// GET /rooms
pub async fn list_rooms_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<RoomsResponse>, ApiError> {
    let rooms = state
        .store
        .list_active_rooms()
        .await
        .map_err(|e| map_err(&request_id, e))?;

    let mut summaries = Vec::with_capacity(rooms.len());
    for room in rooms {
        let players = state
            .store
            .list_active_players(&room.id)
            .await
            .map_err(|e| map_err(&request_id, e))?;
        summaries.push(room_summary(&room, players.len()));
    }
    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(RoomsResponse { rooms: summaries }))
}

/// GET /rooms/{id}
pub async fn room_state_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomStateResponse>, ApiError> {
    let room = state
        .store
        .get_room(&room_id)
        .await
        .map_err(|e| map_err(&request_id, e))?;
    let (stage, version) = state
        .store
        .get_stage_and_version(&room_id)
        .await
        .map_err(|e| map_err(&request_id, e))?;
    let players = state
        .store
        .list_players(&room_id)
        .await
        .map_err(|e| map_err(&request_id, e))?;
    let hands = state
        .store
        .list_hands_for_room(&room_id)
        .await
        .map_err(|e| map_err(&request_id, e))?;

    let dealer = hands
        .iter()
        .find(|h| h.is_dealer())
        .map(|h| dealer_view(h, &stage));
    let player_hands = hands
        .iter()
        .filter(|h| !h.is_dealer())
        .map(hand_view)
        .collect();

    let active = players
        .iter()
        .filter(|p| p.status == crate::store::PlayerStatus::Active)
        .count();

    Ok(Json(RoomStateResponse {
        room: room_summary(&room, active),
        config: room.config.clone(),
        stage,
        version,
        players: players.into_iter().map(PlayerView::from).collect(),
        hands: player_hands,
        dealer,
    }))
}

/// POST /rooms/{id}/join
pub async fn join_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(request): Json<UserRequest>,
) -> Result<Json<PlayerView>, ApiError> {
    let player = state
        .engine
        .join_room(&room_id, &request.user_id)
        .await
        .map_err(|e| map_err(&request_id, e))?;
    Ok(Json(PlayerView::from(player)))
}

/// POST /rooms/{id}/leave
pub async fn leave_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(request): Json<UserRequest>,
) -> Result<Json<HealthResponse>, ApiError> {
    state
        .engine
        .leave_room(&room_id, &request.user_id)
        .await
        .map_err(|e| map_err(&request_id, e))?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

/// POST /rooms/{id}/start
pub async fn start_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(request): Json<UserRequest>,
) -> Result<Json<HealthResponse>, ApiError> {
    state
        .engine
        .start_game(&room_id, &request.user_id)
        .await
        .map_err(|e| map_err(&request_id, e))?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

/// POST /rooms/{id}/actions
pub async fn action_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(request): Json<ActionRequest>,
) -> Result<Json<HealthResponse>, ApiError> {
    state
        .engine
        .perform_action(&room_id, &request.user_id, request.action)
        .await
        .map_err(|e| map_err(&request_id, e))?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

/// POST /rooms/{id}/chat
pub async fn chat_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<HealthResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request(
            request_id.0,
            "chat message cannot be empty".to_string(),
        ));
    }
    state
        .engine
        .chat(&room_id, &request.user_id, &request.message)
        .await
        .map_err(|e| map_err(&request_id, e))?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

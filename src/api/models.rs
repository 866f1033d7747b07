//! API request and response models.

use crate::cards::{hand_value, Card};
use crate::config::GameConfig;
use crate::engine::stage::{Action, Stage};
use crate::events::DealerCard;
use crate::store::{HandRow, PlayerStatus, Room, RoomPlayer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub user_id: String,
    #[serde(default = "default_game_mode")]
    pub game_mode: String,
    /// Omitted fields fall back to the service's configured defaults.
    pub config: Option<GameConfig>,
}

fn default_game_mode() -> String {
    "blackjack".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

/// Action envelope: the payload is a tagged union keyed by its `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub user_id: String,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: String,
    pub host_id: String,
    pub game_mode: String,
    pub active: bool,
    pub ended: bool,
    pub player_count: usize,
    pub max_players: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsResponse {
    pub rooms: Vec<RoomSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub user_id: String,
    pub seat: usize,
    pub balance: i64,
    pub balance_delta: i64,
    pub status: PlayerStatus,
}

impl From<RoomPlayer> for PlayerView {
    fn from(p: RoomPlayer) -> Self {
        Self {
            user_id: p.user_id,
            seat: p.seat,
            balance: p.balance,
            balance_delta: p.balance_delta,
            status: p.status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandView {
    pub user_id: String,
    pub hand_index: usize,
    pub bet: i64,
    pub cards: Vec<Card>,
    pub score: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerHandView {
    pub cards: Vec<DealerCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
}

/// Full room state: the re-sync read clients perform after (re)connecting
/// to the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateResponse {
    pub room: RoomSummary,
    pub config: GameConfig,
    pub stage: Stage,
    pub version: u64,
    pub players: Vec<PlayerView>,
    pub hands: Vec<HandView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dealer: Option<DealerHandView>,
}

pub fn room_summary(room: &Room, player_count: usize) -> RoomSummary {
    RoomSummary {
        id: room.id.clone(),
        host_id: room.host_id.clone(),
        game_mode: room.game_mode.clone(),
        active: room.active,
        ended: room.ended,
        player_count,
        max_players: room.max_players,
        created_at: room.created_at,
    }
}

pub fn hand_view(hand: &HandRow) -> HandView {
    HandView {
        user_id: hand.user_id.clone().unwrap_or_default(),
        hand_index: hand.hand_index,
        bet: hand.bet,
        cards: hand.cards.clone(),
        score: hand_value(&hand.cards).0,
    }
}

/// Shapes the dealer's hand for read-back. While the round is still being
/// played the hole card stays face down with no card data.
pub fn dealer_view(hand: &HandRow, stage: &Stage) -> DealerHandView {
    let revealed = matches!(stage, Stage::FinishRound | Stage::Teardown);
    if revealed || hand.cards.len() < 2 {
        DealerHandView {
            cards: hand.cards.iter().cloned().map(DealerCard::face_up).collect(),
            score: if hand.cards.is_empty() {
                None
            } else {
                Some(hand_value(&hand.cards).0)
            },
        }
    } else {
        DealerHandView {
            cards: vec![
                DealerCard::face_up(hand.cards[0].clone()),
                DealerCard::face_down(),
            ],
            score: None,
        }
    }
}

//! Room state store: the repository contract the engine runs against, plus
//! an in-memory implementation.
//!
//! The store owns durable state. A room's current stage is persisted as a
//! single serialized blob whose root object carries the stage discriminator;
//! every stage write goes through a compare-and-swap on the room's version
//! counter, which is the only concurrency guard in the system.

use crate::cards::Card;
use crate::config::GameConfig;
use crate::engine::stage::Stage;
use crate::errors::{GameError, GameResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub type RoomId = String;
pub type UserId = String;

/// Seat lifecycle within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    Active,
    Away,
    Left,
    Inactive,
}

/// A table hosting one ongoing game session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub host_id: UserId,
    pub game_mode: String,
    pub deck_id: Option<String>,
    pub active: bool,
    pub ended: bool,
    pub min_players: usize,
    pub max_players: usize,
    pub config: GameConfig,
    pub created_at: DateTime<Utc>,
}

/// A user's seat in a room. The balance is the in-room chip stack, distinct
/// from any global wallet; it is mutated only through the engine's bet and
/// payout transitions and never drops below zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlayer {
    pub user_id: UserId,
    pub room_id: RoomId,
    /// Join order; doubles as turn order among active players.
    pub seat: usize,
    pub balance: i64,
    /// Net change this session, for auditing.
    pub balance_delta: i64,
    pub status: PlayerStatus,
    pub joined_at: DateTime<Utc>,
}

/// One dealt set of cards for the current round. `user_id` is `None` for
/// the dealer's hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandRow {
    pub id: u64,
    pub room_id: RoomId,
    pub user_id: Option<UserId>,
    /// Turn-order index among this round's bettors. Unused for the dealer.
    pub order_index: usize,
    /// Supports split hands; always 0 until splits are offered.
    pub hand_index: usize,
    pub bet: i64,
    pub cards: Vec<Card>,
}

impl HandRow {
    pub fn is_dealer(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Repository-shaped storage contract consumed by the engine and scheduler.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn create_room(&self, room: Room) -> GameResult<()>;
    async fn get_room(&self, room_id: &str) -> GameResult<Room>;
    async fn update_room(&self, room: Room) -> GameResult<()>;
    /// Rooms that are active and not ended, for the deadline sweep.
    async fn list_active_rooms(&self) -> GameResult<Vec<Room>>;

    async fn get_stage_and_version(&self, room_id: &str) -> GameResult<(Stage, u64)>;
    /// Writes the new stage only if the room's version still equals
    /// `expected_version`. Returns whether the write happened.
    async fn write_stage_if_version_matches(
        &self,
        room_id: &str,
        stage: &Stage,
        expected_version: u64,
    ) -> GameResult<bool>;

    async fn insert_player(&self, player: RoomPlayer) -> GameResult<()>;
    async fn get_player(&self, room_id: &str, user_id: &str) -> GameResult<RoomPlayer>;
    async fn set_player_status(
        &self,
        room_id: &str,
        user_id: &str,
        status: PlayerStatus,
    ) -> GameResult<RoomPlayer>;
    /// Applies `delta` to the player's balance. Fails with NotFound if the
    /// seat is missing and BadRequest if the result would be negative.
    async fn adjust_player_balance(
        &self,
        room_id: &str,
        user_id: &str,
        delta: i64,
    ) -> GameResult<RoomPlayer>;
    /// All seats in join order.
    async fn list_players(&self, room_id: &str) -> GameResult<Vec<RoomPlayer>>;
    /// Active seats in join order; this is the round's turn order.
    async fn list_active_players(&self, room_id: &str) -> GameResult<Vec<RoomPlayer>>;

    /// Stores a hand row and returns its assigned id.
    async fn create_hand(&self, hand: HandRow) -> GameResult<u64>;
    async fn update_hand(&self, hand: HandRow) -> GameResult<()>;
    /// Player hands sorted by (order_index, hand_index), then the dealer.
    async fn list_hands_for_room(&self, room_id: &str) -> GameResult<Vec<HandRow>>;
    async fn clear_hands(&self, room_id: &str) -> GameResult<()>;
}

struct RoomEntry {
    room: Room,
    /// Serialized current stage; root object carries the discriminator.
    stage_blob: String,
    version: u64,
    /// Seat order is join order.
    players: Vec<RoomPlayer>,
    hands: Vec<HandRow>,
    next_hand_id: u64,
}

/// In-memory store backed by a concurrent map; unrelated rooms proceed
/// fully in parallel while per-room writes serialize on the entry.
pub struct MemoryRoomStore {
    rooms: DashMap<RoomId, RoomEntry>,
    stage_writes: AtomicU64,
    version_conflicts: AtomicU64,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            stage_writes: AtomicU64::new(0),
            version_conflicts: AtomicU64::new(0),
        }
    }

    /// (successful stage writes, rejected version mismatches)
    pub fn write_stats(&self) -> (u64, u64) {
        (
            self.stage_writes.load(Ordering::Relaxed),
            self.version_conflicts.load(Ordering::Relaxed),
        )
    }

    fn with_entry<T>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut RoomEntry) -> GameResult<T>,
    ) -> GameResult<T> {
        let mut entry = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| GameError::not_found(format!("room {} not found", room_id)))?;
        f(entry.value_mut())
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create_room(&self, room: Room) -> GameResult<()> {
        let blob = serde_json::to_string(&Stage::NotStarted)?;
        let entry = RoomEntry {
            room: room.clone(),
            stage_blob: blob,
            version: 0,
            players: Vec::new(),
            hands: Vec::new(),
            next_hand_id: 1,
        };
        if self.rooms.insert(room.id.clone(), entry).is_some() {
            return Err(GameError::Internal(format!(
                "room {} already exists",
                room.id
            )));
        }
        Ok(())
    }

    async fn get_room(&self, room_id: &str) -> GameResult<Room> {
        self.with_entry(room_id, |e| Ok(e.room.clone()))
    }

    async fn update_room(&self, room: Room) -> GameResult<()> {
        self.with_entry(&room.id.clone(), |e| {
            e.room = room;
            Ok(())
        })
    }

    async fn list_active_rooms(&self) -> GameResult<Vec<Room>> {
        Ok(self
            .rooms
            .iter()
            .filter(|e| e.room.active && !e.room.ended)
            .map(|e| e.room.clone())
            .collect())
    }

    async fn get_stage_and_version(&self, room_id: &str) -> GameResult<(Stage, u64)> {
        self.with_entry(room_id, |e| {
            let stage: Stage = serde_json::from_str(&e.stage_blob)?;
            Ok((stage, e.version))
        })
    }

    async fn write_stage_if_version_matches(
        &self,
        room_id: &str,
        stage: &Stage,
        expected_version: u64,
    ) -> GameResult<bool> {
        let blob = serde_json::to_string(stage)?;
        self.with_entry(room_id, |e| {
            if e.version != expected_version {
                self.version_conflicts.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
            e.stage_blob = blob;
            e.version += 1;
            self.stage_writes.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        })
    }

    async fn insert_player(&self, player: RoomPlayer) -> GameResult<()> {
        self.with_entry(&player.room_id.clone(), |e| {
            if e.players.iter().any(|p| p.user_id == player.user_id) {
                return Err(GameError::Internal(format!(
                    "player {} already seated in {}",
                    player.user_id, player.room_id
                )));
            }
            e.players.push(player);
            Ok(())
        })
    }

    async fn get_player(&self, room_id: &str, user_id: &str) -> GameResult<RoomPlayer> {
        self.with_entry(room_id, |e| {
            e.players
                .iter()
                .find(|p| p.user_id == user_id)
                .cloned()
                .ok_or_else(|| {
                    GameError::not_found(format!("player {} not in room {}", user_id, room_id))
                })
        })
    }

    async fn set_player_status(
        &self,
        room_id: &str,
        user_id: &str,
        status: PlayerStatus,
    ) -> GameResult<RoomPlayer> {
        self.with_entry(room_id, |e| {
            let player = e
                .players
                .iter_mut()
                .find(|p| p.user_id == user_id)
                .ok_or_else(|| {
                    GameError::not_found(format!("player {} not in room {}", user_id, room_id))
                })?;
            player.status = status;
            Ok(player.clone())
        })
    }

    async fn adjust_player_balance(
        &self,
        room_id: &str,
        user_id: &str,
        delta: i64,
    ) -> GameResult<RoomPlayer> {
        self.with_entry(room_id, |e| {
            let player = e
                .players
                .iter_mut()
                .find(|p| p.user_id == user_id)
                .ok_or_else(|| {
                    GameError::not_found(format!("player {} not in room {}", user_id, room_id))
                })?;
            let next = player.balance + delta;
            if next < 0 {
                return Err(GameError::bad_request(format!(
                    "balance of {} cannot go below zero",
                    user_id
                )));
            }
            player.balance = next;
            player.balance_delta += delta;
            Ok(player.clone())
        })
    }

    async fn list_players(&self, room_id: &str) -> GameResult<Vec<RoomPlayer>> {
        self.with_entry(room_id, |e| Ok(e.players.clone()))
    }

    async fn list_active_players(&self, room_id: &str) -> GameResult<Vec<RoomPlayer>> {
        self.with_entry(room_id, |e| {
            Ok(e.players
                .iter()
                .filter(|p| p.status == PlayerStatus::Active)
                .cloned()
                .collect())
        })
    }

    async fn create_hand(&self, mut hand: HandRow) -> GameResult<u64> {
        self.with_entry(&hand.room_id.clone(), |e| {
            hand.id = e.next_hand_id;
            e.next_hand_id += 1;
            let id = hand.id;
            e.hands.push(hand);
            Ok(id)
        })
    }

    async fn update_hand(&self, hand: HandRow) -> GameResult<()> {
        self.with_entry(&hand.room_id.clone(), |e| {
            let slot = e
                .hands
                .iter_mut()
                .find(|h| h.id == hand.id)
                .ok_or_else(|| GameError::not_found(format!("hand {} not found", hand.id)))?;
            *slot = hand;
            Ok(())
        })
    }

    async fn list_hands_for_room(&self, room_id: &str) -> GameResult<Vec<HandRow>> {
        self.with_entry(room_id, |e| {
            let mut hands = e.hands.clone();
            // Player hands in turn order, dealer hand last.
            hands.sort_by_key(|h| (h.is_dealer(), h.order_index, h.hand_index));
            Ok(hands)
        })
    }

    async fn clear_hands(&self, room_id: &str) -> GameResult<()> {
        self.with_entry(room_id, |e| {
            e.hands.clear();
            Ok(())
        })
    }
}

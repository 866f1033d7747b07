//! Typed room events and the per-room broadcaster.
//!
//! Every event carries a `type` discriminator so observers never need
//! type-based dispatch. Fan-out preserves per-room emission order; each
//! subscriber owns a bounded queue and a slow consumer loses events rather
//! than ever blocking the engine's transition path.

use crate::cards::Card;
use crate::engine::round::Outcome;
use crate::engine::stage::Stage;
use crate::store::{RoomId, UserId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// One dealer card as shown to observers. The hole card is broadcast face
/// down with no card data until the round finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerCard {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<Card>,
    pub is_face_down: bool,
}

impl DealerCard {
    pub fn face_up(card: Card) -> Self {
        Self {
            card: Some(card),
            is_face_down: false,
        }
    }

    pub fn face_down() -> Self {
        Self {
            card: None,
            is_face_down: true,
        }
    }
}

/// Room event stream vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    PlayerJoined {
        user_id: UserId,
        seat: usize,
        balance: i64,
    },
    PlayerLeft {
        user_id: UserId,
    },
    HostChanged {
        host_id: UserId,
    },
    ChatMessage {
        user_id: UserId,
        message: String,
        sent_at: DateTime<Utc>,
    },
    /// The new stage payload after a durable transition.
    GameState {
        version: u64,
        stage: Stage,
    },
    /// Echo of an accepted player action; `forced` marks deadline-driven
    /// transitions performed on the player's behalf.
    PlayerAction {
        user_id: UserId,
        action: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        amount: Option<i64>,
        forced: bool,
    },
    PlayerReveal {
        user_id: UserId,
        hand_index: usize,
        cards: Vec<Card>,
        score: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<Outcome>,
        #[serde(skip_serializing_if = "Option::is_none")]
        payout: Option<i64>,
    },
    DealerReveal {
        cards: Vec<DealerCard>,
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<u8>,
    },
}

/// A live subscription handle. Dropping the receiver is enough to
/// disconnect; the broadcaster reaps the sender on the next publish.
pub struct Subscription {
    pub id: String,
    pub room_id: RoomId,
    pub receiver: mpsc::Receiver<Event>,
}

/// Fans events out to every observer of a room.
pub struct Broadcaster {
    rooms: DashMap<RoomId, HashMap<String, mpsc::Sender<Event>>>,
    capacity: usize,
    dropped_events: AtomicU64,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            capacity,
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Registers a new observer. Non-blocking.
    pub fn subscribe(&self, room_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4().to_string();
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(id.clone(), tx);
        debug!(room_id, subscriber = %id, "observer subscribed");
        Subscription {
            id,
            room_id: room_id.to_string(),
            receiver: rx,
        }
    }

    /// Removes an observer and releases its queue.
    pub fn unsubscribe(&self, room_id: &str, subscriber_id: &str) {
        if let Some(mut subscribers) = self.rooms.get_mut(room_id) {
            subscribers.remove(subscriber_id);
            if subscribers.is_empty() {
                drop(subscribers);
                self.rooms.remove_if(room_id, |_, subs| subs.is_empty());
            }
        }
        debug!(room_id, subscriber = %subscriber_id, "observer unsubscribed");
    }

    /// Publishes one event to every current subscriber of the room.
    ///
    /// Runs under the room's registry entry so concurrent publishers cannot
    /// interleave one room's events; a full subscriber queue drops the event
    /// for that subscriber only (at-most-once, never redelivered).
    pub fn publish(&self, room_id: &str, event: &Event) {
        let Some(mut subscribers) = self.rooms.get_mut(room_id) else {
            return;
        };

        let mut disconnected: Vec<String> = Vec::new();
        for (id, tx) in subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped_events.fetch_add(1, Ordering::Relaxed);
                    warn!(room_id, subscriber = %id, "subscriber queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    disconnected.push(id.clone());
                }
            }
        }
        for id in disconnected {
            subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

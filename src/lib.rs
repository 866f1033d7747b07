//! Cardroom - room-scoped multiplayer blackjack engine.
//!
//! A turn-based table game service: rooms advance through betting, dealing
//! and player-action stages under an optimistic per-room version guard,
//! while a broadcaster pushes typed events to every room observer and a
//! background sweep enforces stage deadlines.

pub mod api;
pub mod cards;
pub mod config;
pub mod deck;
pub mod engine;
pub mod errors;
pub mod events;
pub mod scheduler;
pub mod store;

pub use config::CardroomConfig;
pub use deck::{DeckProvider, HttpDeckProvider, StubDeckProvider};
pub use engine::stage::{Action, Stage};
pub use engine::GameEngine;
pub use errors::{GameError, GameResult};
pub use events::{Broadcaster, Event};
pub use scheduler::DeadlineScheduler;
pub use store::{MemoryRoomStore, RoomStore};

//! Configuration management with validation and defaults.

use crate::errors::{GameError, GameResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level service configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CardroomConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub deck: DeckConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// HTTP/WebSocket server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// Per-room game parameters, immutable once a room is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    /// Chip stack handed to every player on join.
    pub starting_balance: i64,
    /// Smallest accepted wager.
    pub min_bet: i64,
    /// Betting window length in seconds.
    pub betting_seconds: u64,
    /// Per-turn window length in seconds.
    pub turn_seconds: u64,
    /// Restore every stack to `starting_balance` at round teardown.
    pub reset_balance_each_round: bool,
    /// Gain multiplier for a two-card 21, on top of the returned bet.
    pub blackjack_payout: f64,
    pub min_players: usize,
    pub max_players: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1000,
            min_bet: 10,
            betting_seconds: 30,
            turn_seconds: 20,
            reset_balance_each_round: false,
            blackjack_payout: 1.5,
            min_players: 1,
            max_players: 6,
        }
    }
}

impl GameConfig {
    pub fn betting_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.betting_seconds as i64)
    }

    pub fn turn_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.turn_seconds as i64)
    }
}

/// Deck provider endpoint configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeckConfig {
    pub base_url: String,
    /// How many 52-card decks the provider shuffles into the shoe.
    pub deck_count: u8,
    pub request_timeout_ms: u64,
    /// Attempts beyond the first before a call is declared failed.
    pub max_retries: u32,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            base_url: "https://deckofcardsapi.com".to_string(),
            deck_count: 6,
            request_timeout_ms: 5_000,
            max_retries: 2,
        }
    }
}

impl DeckConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Deadline sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_ms: 500 }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl CardroomConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> GameResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GameError::Internal(format!(
                "failed to read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| GameError::Internal(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for logical consistency.
    pub fn validate(&self) -> GameResult<()> {
        if self.game.min_bet <= 0 {
            return Err(GameError::Internal("min_bet must be > 0".to_string()));
        }
        if self.game.starting_balance < self.game.min_bet {
            return Err(GameError::Internal(
                "starting_balance must cover at least one minimum bet".to_string(),
            ));
        }
        if self.game.blackjack_payout < 1.0 {
            return Err(GameError::Internal(
                "blackjack_payout must be >= 1.0".to_string(),
            ));
        }
        if self.game.max_players == 0 || self.game.min_players > self.game.max_players {
            return Err(GameError::Internal(
                "player bounds must satisfy 0 < min_players <= max_players".to_string(),
            ));
        }
        if self.game.betting_seconds == 0 || self.game.turn_seconds == 0 {
            return Err(GameError::Internal(
                "stage windows must be > 0 seconds".to_string(),
            ));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(GameError::Internal("tick_ms must be > 0".to_string()));
        }
        // The sweep must fire well within a betting window or deadlines
        // would be enforced a whole stage late.
        if self.scheduler.tick_ms / 1000 > self.game.betting_seconds {
            return Err(GameError::Internal(
                "scheduler tick is slower than the betting window".to_string(),
            ));
        }
        Ok(())
    }
}

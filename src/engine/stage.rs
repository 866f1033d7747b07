//! The room's stage machine vocabulary: stage and action tagged unions.
//!
//! Both enums serialize with a `type` discriminator and camelCase payload
//! fields; external consumers dispatch on the discriminator string, so the
//! variant names here are wire-stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::store::UserId;

/// Exactly one stage is active per room at any instant. The payload carried
/// by a variant is the only durable state between transitions besides the
/// player and hand rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Stage {
    /// Room exists, host has not started a game.
    NotStarted,
    /// Round bootstrap: deck allocated, bookkeeping about to reset.
    Init,
    /// Per-round bookkeeping reset; betting window opens next.
    Setup,
    /// Betting window. `bets` maps each wagered player to their amount.
    Betting {
        deadline: DateTime<Utc>,
        bets: HashMap<UserId, i64>,
    },
    /// Cards are being drawn for every bettor plus the dealer.
    Dealing,
    /// One player hand holds the turn, identified by turn-order index and
    /// hand index (hand index reserved for split hands).
    PlayerAction {
        deadline: DateTime<Utc>,
        player_index: usize,
        hand_index: usize,
    },
    /// Dealer plays out, hands are compared, payouts applied.
    FinishRound,
    /// Round cleanup; loops back to `Init` while the room stays active.
    Teardown,
}

impl Stage {
    /// Discriminator string as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::NotStarted => "not_started",
            Stage::Init => "init",
            Stage::Setup => "setup",
            Stage::Betting { .. } => "betting",
            Stage::Dealing => "dealing",
            Stage::PlayerAction { .. } => "player_action",
            Stage::FinishRound => "finish_round",
            Stage::Teardown => "teardown",
        }
    }

    /// The binding auto-advance instant, for deadline-bearing stages.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            Stage::Betting { deadline, .. } => Some(*deadline),
            Stage::PlayerAction { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }
}

/// An inbound player action, tagged the same way stage payloads are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Action {
    /// Wager `amount` for the current round. Replaces any earlier bet
    /// placed in the same betting stage.
    Bet { amount: i64 },
    /// Draw one card into the acting hand.
    Hit,
    /// End the acting hand's turn.
    Stand,
    /// Double the bet, draw exactly one card, end the turn.
    Double,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Bet { .. } => "bet",
            Action::Hit => "hit",
            Action::Stand => "stand",
            Action::Double => "double",
        }
    }
}

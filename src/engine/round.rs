//! Pure round logic: turn pointer advancement, dealer play decisions and
//! settlement math. No I/O here; the orchestration layer in `engine` feeds
//! these functions local copies of the round state.

use crate::cards::{hand_value, is_blackjack, is_bust, Card};
use crate::store::HandRow;
use serde::{Deserialize, Serialize};

/// Dealer hits strictly below this total and stands on all 17s.
pub const DEALER_STAND_VALUE: u8 = 17;

/// How one player hand fared against the dealer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Two-card 21, paid at the configured multiplier.
    Blackjack,
    Win,
    /// Equal totals: the original bet comes back, no gain or loss.
    Push,
    Lose,
}

/// Position of a hand in the turn order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandPointer {
    pub player_index: usize,
    pub hand_index: usize,
}

/// Finds the player hand a pointer refers to.
pub fn hand_at<'a>(hands: &'a [HandRow], pointer: HandPointer) -> Option<&'a HandRow> {
    hands
        .iter()
        .filter(|h| !h.is_dealer())
        .find(|h| h.order_index == pointer.player_index && h.hand_index == pointer.hand_index)
}

/// Advances the pointer to the next player hand in (order, hand) order, or
/// `None` when the pointed-at hand was the last one.
pub fn next_pointer(hands: &[HandRow], pointer: HandPointer) -> Option<HandPointer> {
    hands
        .iter()
        .filter(|h| !h.is_dealer())
        .filter(|h| {
            (h.order_index, h.hand_index) > (pointer.player_index, pointer.hand_index)
        })
        .map(|h| HandPointer {
            player_index: h.order_index,
            hand_index: h.hand_index,
        })
        .min_by_key(|p| (p.player_index, p.hand_index))
}

/// Whether the dealer must keep drawing.
pub fn dealer_should_hit(dealer_cards: &[Card]) -> bool {
    hand_value(dealer_cards).0 < DEALER_STAND_VALUE
}

/// Whether any player hand is still live enough to require dealer play.
/// If every hand busted or is a natural, the dealer has nothing to beat.
pub fn dealer_must_play(hands: &[HandRow]) -> bool {
    hands
        .iter()
        .filter(|h| !h.is_dealer())
        .any(|h| !is_bust(&h.cards) && !is_blackjack(&h.cards))
}

/// Classifies one player hand against the dealer's final cards.
pub fn classify(player_cards: &[Card], dealer_cards: &[Card]) -> Outcome {
    if is_bust(player_cards) {
        return Outcome::Lose;
    }
    if is_blackjack(player_cards) {
        return if is_blackjack(dealer_cards) {
            Outcome::Push
        } else {
            Outcome::Blackjack
        };
    }
    if is_blackjack(dealer_cards) {
        return Outcome::Lose;
    }
    if is_bust(dealer_cards) {
        return Outcome::Win;
    }

    let (player, _) = hand_value(player_cards);
    let (dealer, _) = hand_value(dealer_cards);
    if player > dealer {
        Outcome::Win
    } else if player == dealer {
        Outcome::Push
    } else {
        Outcome::Lose
    }
}

/// Amount credited back to the player for an outcome. Bets were debited when
/// placed, so the payout is additive: a win returns the bet plus the gain, a
/// push returns the bet, a loss returns nothing.
pub fn payout_for(outcome: Outcome, bet: i64, blackjack_multiplier: f64) -> i64 {
    match outcome {
        Outcome::Blackjack => bet + (bet as f64 * blackjack_multiplier).floor() as i64,
        Outcome::Win => bet * 2,
        Outcome::Push => bet,
        Outcome::Lose => 0,
    }
}

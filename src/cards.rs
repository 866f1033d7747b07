//! Card wire shape and blackjack hand evaluation.

use serde::{Deserialize, Serialize};

/// A single card as returned by the deck provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Short code, e.g. "AS" (ace of spades) or "0D" (ten of diamonds).
    pub code: String,
    /// Suit name, e.g. "SPADES".
    pub suit: String,
    /// Face value name: "ACE", "2".."10", "JACK", "QUEEN", "KING".
    pub value: String,
    /// Provider-hosted card image URL.
    pub image: String,
}

impl Card {
    pub fn new(code: &str, suit: &str, value: &str) -> Self {
        Self {
            code: code.to_string(),
            suit: suit.to_string(),
            value: value.to_string(),
            image: format!("https://deckofcardsapi.com/static/img/{}.png", code),
        }
    }
}

/// Blackjack point value for a face value name. Aces count 11 here and are
/// demoted to 1 in [`hand_value`] as needed.
fn card_points(value: &str) -> u8 {
    match value {
        "ACE" => 11,
        "KING" | "QUEEN" | "JACK" | "10" => 10,
        other => other.parse().unwrap_or(0),
    }
}

/// Evaluates a hand, returning (value, is_soft).
///
/// Each ace starts at 11 and is demoted to 1 while the total exceeds 21.
/// The hand is soft while at least one ace still counts as 11.
pub fn hand_value(cards: &[Card]) -> (u8, bool) {
    let mut value: u8 = 0;
    let mut aces: u8 = 0;

    for card in cards {
        if card.value == "ACE" {
            aces += 1;
        }
        value = value.saturating_add(card_points(&card.value));
    }

    while value > 21 && aces > 0 {
        value -= 10;
        aces -= 1;
    }

    let is_soft = aces > 0 && value <= 21;
    (value, is_soft)
}

/// A two-card 21. Pays the configured multiplier, distinct from a later 21.
pub fn is_blackjack(cards: &[Card]) -> bool {
    cards.len() == 2 && hand_value(cards).0 == 21
}

/// Over 21.
pub fn is_bust(cards: &[Card]) -> bool {
    hand_value(cards).0 > 21
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cards(values: &[&str]) -> Vec<Card> {
        values
            .iter()
            .map(|v| Card::new("XX", "SPADES", v))
            .collect()
    }

    #[test]
    fn test_hard_hand_value() {
        assert_eq!(hand_value(&cards(&["10", "7"])), (17, false));
        assert_eq!(hand_value(&cards(&["KING", "QUEEN", "2"])), (22, false));
    }

    #[test]
    fn test_soft_hand_and_ace_demotion() {
        // Soft 18: ace counts 11.
        assert_eq!(hand_value(&cards(&["ACE", "7"])), (18, true));
        // Drawing a ten demotes the ace: hard 18.
        assert_eq!(hand_value(&cards(&["ACE", "7", "10"])), (18, false));
        // Two aces: one demoted immediately.
        assert_eq!(hand_value(&cards(&["ACE", "ACE"])), (12, true));
        // Each ace demoted as needed to stay under 21.
        assert_eq!(hand_value(&cards(&["ACE", "ACE", "9", "10"])), (21, false));
    }

    #[test]
    fn test_blackjack_detection() {
        assert!(is_blackjack(&cards(&["ACE", "KING"])));
        assert!(!is_blackjack(&cards(&["7", "7", "7"])));
        assert!(!is_blackjack(&cards(&["10", "9"])));
    }

    #[test]
    fn test_bust_detection() {
        assert!(is_bust(&cards(&["KING", "QUEEN", "2"])));
        assert!(!is_bust(&cards(&["ACE", "KING", "QUEEN"])));
    }
}

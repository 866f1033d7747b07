//! End-to-end round scenarios over the engine, memory store and stub deck.

use cardroom::cards::Card;
use cardroom::config::GameConfig;
use cardroom::deck::StubDeckProvider;
use cardroom::engine::stage::{Action, Stage};
use cardroom::engine::GameEngine;
use cardroom::errors::GameError;
use cardroom::events::{Broadcaster, Event};
use cardroom::store::{MemoryRoomStore, PlayerStatus, RoomStore};
use std::sync::Arc;

fn card(code: &str, value: &str) -> Card {
    Card::new(code, "SPADES", value)
}

fn config(betting_seconds: u64, turn_seconds: u64) -> GameConfig {
    GameConfig {
        starting_balance: 1000,
        min_bet: 10,
        betting_seconds,
        turn_seconds,
        reset_balance_each_round: false,
        blackjack_payout: 1.5,
        min_players: 1,
        max_players: 6,
    }
}

struct Table {
    engine: Arc<GameEngine>,
    store: Arc<MemoryRoomStore>,
    deck: Arc<StubDeckProvider>,
    broadcaster: Arc<Broadcaster>,
}

fn table(cards: Vec<Card>) -> Table {
    let store = Arc::new(MemoryRoomStore::new());
    let deck = Arc::new(StubDeckProvider::new(cards));
    let broadcaster = Arc::new(Broadcaster::default());
    let engine = Arc::new(GameEngine::new(
        store.clone(),
        deck.clone(),
        broadcaster.clone(),
    ));
    Table {
        engine,
        store,
        deck,
        broadcaster,
    }
}

async fn bet(t: &Table, room_id: &str, user: &str, amount: i64) -> Result<(), GameError> {
    t.engine
        .perform_action(room_id, user, Action::Bet { amount })
        .await
}

// ----------------------------------------------------------------------
// Betting
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_bet_debits_balance_and_records_wager() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();

    bet(&t, &room.id, "alice", 100).await.unwrap();

    let alice = t.store.get_player(&room.id, "alice").await.unwrap();
    assert_eq!(alice.balance, 900);

    let (stage, _) = t.store.get_stage_and_version(&room.id).await.unwrap();
    match stage {
        Stage::Betting { bets, .. } => {
            assert_eq!(bets.get("alice"), Some(&100));
            assert!(!bets.contains_key("bob"));
        }
        other => panic!("expected betting, got {}", other.name()),
    }
}

#[tokio::test]
async fn test_repeat_bet_replaces_without_double_debit() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();

    bet(&t, &room.id, "alice", 100).await.unwrap();
    bet(&t, &room.id, "alice", 40).await.unwrap();

    // Net effect of the replacement is the latest amount only.
    let alice = t.store.get_player(&room.id, "alice").await.unwrap();
    assert_eq!(alice.balance, 960);
    let (stage, _) = t.store.get_stage_and_version(&room.id).await.unwrap();
    match stage {
        Stage::Betting { bets, .. } => assert_eq!(bets.get("alice"), Some(&40)),
        other => panic!("expected betting, got {}", other.name()),
    }
}

#[tokio::test]
async fn test_bet_below_minimum_rejected_without_mutation() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    let (_, version_before) = t.store.get_stage_and_version(&room.id).await.unwrap();

    let err = bet(&t, &room.id, "alice", 5).await.unwrap_err();
    assert!(matches!(err, GameError::BadRequest(_)));

    let alice = t.store.get_player(&room.id, "alice").await.unwrap();
    assert_eq!(alice.balance, 1000);
    let (_, version_after) = t.store.get_stage_and_version(&room.id).await.unwrap();
    assert_eq!(version_before, version_after);
}

#[tokio::test]
async fn test_bet_over_balance_rejected_without_mutation() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    let (stage_before, version_before) = t.store.get_stage_and_version(&room.id).await.unwrap();

    let err = bet(&t, &room.id, "alice", 1500).await.unwrap_err();
    assert!(matches!(err, GameError::BadRequest(_)));

    let alice = t.store.get_player(&room.id, "alice").await.unwrap();
    assert_eq!(alice.balance, 1000);
    let (stage_after, version_after) = t.store.get_stage_and_version(&room.id).await.unwrap();
    assert_eq!(stage_before, stage_after);
    assert_eq!(version_before, version_after);
}

#[tokio::test]
async fn test_hit_outside_player_action_rejected() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    let (_, version_before) = t.store.get_stage_and_version(&room.id).await.unwrap();

    let err = t
        .engine
        .perform_action(&room.id, "alice", Action::Hit)
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::BadRequest(_)));

    let alice = t.store.get_player(&room.id, "alice").await.unwrap();
    assert_eq!(alice.balance, 1000);
    let (_, version_after) = t.store.get_stage_and_version(&room.id).await.unwrap();
    assert_eq!(version_before, version_after);
}

#[tokio::test]
async fn test_stranger_cannot_act() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();

    let err = bet(&t, &room.id, "mallory", 100).await.unwrap_err();
    assert!(matches!(err, GameError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_bets_are_not_lost() {
    // Three players so the two racing bets leave the stage in Betting.
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();
    t.engine.join_room(&room.id, "carol").await.unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();

    let (e1, r1) = (t.engine.clone(), room.id.clone());
    let (e2, r2) = (t.engine.clone(), room.id.clone());
    let a = tokio::spawn(async move {
        e1.perform_action(&r1, "alice", Action::Bet { amount: 100 }).await
    });
    let b = tokio::spawn(async move {
        e2.perform_action(&r2, "bob", Action::Bet { amount: 50 }).await
    });
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let (stage, _) = t.store.get_stage_and_version(&room.id).await.unwrap();
    match stage {
        Stage::Betting { bets, .. } => {
            assert_eq!(bets.get("alice"), Some(&100));
            assert_eq!(bets.get("bob"), Some(&50));
        }
        other => panic!("expected betting, got {}", other.name()),
    }
    assert_eq!(
        t.store.get_player(&room.id, "alice").await.unwrap().balance,
        900
    );
    assert_eq!(
        t.store.get_player(&room.id, "bob").await.unwrap().balance,
        950
    );
}

// ----------------------------------------------------------------------
// Dealing
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_final_bet_advances_to_dealing_and_deals_two_cards_each() {
    let t = table(vec![
        // Alice's hand, then Bob's, then the dealer.
        card("0S", "10"),
        card("9S", "9"),
        card("0H", "10"),
        card("8H", "8"),
        card("KS", "KING"),
        card("6S", "6"),
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();

    bet(&t, &room.id, "alice", 100).await.unwrap();
    bet(&t, &room.id, "bob", 50).await.unwrap();

    let (stage, _) = t.store.get_stage_and_version(&room.id).await.unwrap();
    match stage {
        Stage::PlayerAction {
            player_index,
            hand_index,
            ..
        } => assert_eq!((player_index, hand_index), (0, 0)),
        other => panic!("expected player_action, got {}", other.name()),
    }

    assert_eq!(
        t.store.get_player(&room.id, "alice").await.unwrap().balance,
        900
    );
    assert_eq!(
        t.store.get_player(&room.id, "bob").await.unwrap().balance,
        950
    );

    let hands = t.store.list_hands_for_room(&room.id).await.unwrap();
    assert_eq!(hands.len(), 3);
    for hand in &hands {
        assert_eq!(hand.cards.len(), 2);
    }
    assert_eq!(hands[0].user_id.as_deref(), Some("alice"));
    assert_eq!(hands[0].bet, 100);
    assert_eq!(hands[1].user_id.as_deref(), Some("bob"));
    assert_eq!(hands[1].bet, 50);
    assert!(hands[2].is_dealer());
}

#[tokio::test]
async fn test_dealer_reveal_hides_hole_card_until_finish() {
    let t = table(vec![
        card("0S", "10"),
        card("9S", "9"),
        card("KS", "KING"),
        card("6S", "6"),
        card("QS", "QUEEN"), // dealer draw-out card
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    let mut sub = t.broadcaster.subscribe(&room.id);

    bet(&t, &room.id, "alice", 100).await.unwrap();
    t.engine
        .perform_action(&room.id, "alice", Action::Stand)
        .await
        .unwrap();

    let mut dealer_reveals = Vec::new();
    while let Ok(event) = sub.receiver.try_recv() {
        if let Event::DealerReveal { cards, score } = event {
            dealer_reveals.push((cards, score));
        }
    }
    assert_eq!(dealer_reveals.len(), 2);

    // At dealing time: exactly one card up, one face down, no score.
    let (dealt, score) = &dealer_reveals[0];
    assert_eq!(dealt.len(), 2);
    assert!(!dealt[0].is_face_down);
    assert!(dealt[0].card.is_some());
    assert!(dealt[1].is_face_down);
    assert!(dealt[1].card.is_none());
    assert!(score.is_none());

    // After the round: everything face up plus a computed score.
    let (finished, score) = &dealer_reveals[1];
    assert!(finished.len() >= 2);
    assert!(finished.iter().all(|c| !c.is_face_down && c.card.is_some()));
    assert_eq!(*score, Some(26)); // K + 6 + Q busts at 26
}

// ----------------------------------------------------------------------
// Player turns and settlement
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_stand_advances_pointer_and_round_settles() {
    let t = table(vec![
        card("0S", "10"),
        card("9S", "9"), // alice: 19
        card("0H", "10"),
        card("8H", "8"), // bob: 18
        card("KS", "KING"),
        card("6S", "6"),      // dealer: 16
        card("QS", "QUEEN"), // dealer draws to 26, bust
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    bet(&t, &room.id, "alice", 100).await.unwrap();
    bet(&t, &room.id, "bob", 50).await.unwrap();

    // Out-of-turn stand is rejected.
    let err = t
        .engine
        .perform_action(&room.id, "bob", Action::Stand)
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::BadRequest(_)));

    t.engine
        .perform_action(&room.id, "alice", Action::Stand)
        .await
        .unwrap();
    let (stage, _) = t.store.get_stage_and_version(&room.id).await.unwrap();
    match stage {
        Stage::PlayerAction {
            player_index,
            hand_index,
            ..
        } => assert_eq!((player_index, hand_index), (1, 0)),
        other => panic!("expected player_action, got {}", other.name()),
    }

    // Last hand standing finishes the round and the machine loops into the
    // next round's betting window.
    t.engine
        .perform_action(&room.id, "bob", Action::Stand)
        .await
        .unwrap();
    let (stage, _) = t.store.get_stage_and_version(&room.id).await.unwrap();
    assert!(matches!(stage, Stage::Betting { ref bets, .. } if bets.is_empty()));

    // Dealer busted at 26: both standing hands win even money.
    assert_eq!(
        t.store.get_player(&room.id, "alice").await.unwrap().balance,
        1100
    );
    assert_eq!(
        t.store.get_player(&room.id, "bob").await.unwrap().balance,
        1050
    );
    // Hands were cleared at teardown.
    assert!(t.store.list_hands_for_room(&room.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_hit_busts_and_ends_turn() {
    let t = table(vec![
        card("0S", "10"),
        card("6S", "6"), // alice: 16
        card("KS", "KING"),
        card("QS", "QUEEN"), // dealer: 20
        card("9S", "9"),     // alice hits to 25
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    bet(&t, &room.id, "alice", 100).await.unwrap();

    t.engine
        .perform_action(&room.id, "alice", Action::Hit)
        .await
        .unwrap();

    // Bust ended the only hand's turn; the round settled as a loss and the
    // next betting window opened. Dealer never drew (nothing to beat).
    let (stage, _) = t.store.get_stage_and_version(&room.id).await.unwrap();
    assert!(matches!(stage, Stage::Betting { .. }));
    assert_eq!(
        t.store.get_player(&room.id, "alice").await.unwrap().balance,
        900
    );
    assert_eq!(t.deck.draw_calls(), 3); // 2 deals + 1 hit, no dealer draw
}

#[tokio::test]
async fn test_hit_keeps_turn_when_not_busted() {
    let t = table(vec![
        card("5S", "5"),
        card("6S", "6"), // alice: 11
        card("KS", "KING"),
        card("9S", "9"), // dealer: 19
        card("2S", "2"), // alice hits to 13
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    bet(&t, &room.id, "alice", 100).await.unwrap();

    t.engine
        .perform_action(&room.id, "alice", Action::Hit)
        .await
        .unwrap();

    let (stage, _) = t.store.get_stage_and_version(&room.id).await.unwrap();
    match stage {
        Stage::PlayerAction {
            player_index,
            hand_index,
            ..
        } => assert_eq!((player_index, hand_index), (0, 0)),
        other => panic!("expected player_action, got {}", other.name()),
    }
    let hands = t.store.list_hands_for_room(&room.id).await.unwrap();
    assert_eq!(hands[0].cards.len(), 3);
}

#[tokio::test]
async fn test_blackjack_pays_multiplier() {
    let t = table(vec![
        card("AS", "ACE"),
        card("KS", "KING"), // alice: natural 21
        card("0D", "10"),
        card("9D", "9"), // dealer: 19
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    bet(&t, &room.id, "alice", 100).await.unwrap();

    t.engine
        .perform_action(&room.id, "alice", Action::Stand)
        .await
        .unwrap();

    // 100 back plus 150 gain at the 1.5 multiplier.
    assert_eq!(
        t.store.get_player(&room.id, "alice").await.unwrap().balance,
        1150
    );
}

#[tokio::test]
async fn test_push_returns_bet() {
    let t = table(vec![
        card("0S", "10"),
        card("8S", "8"), // alice: 18
        card("0D", "10"),
        card("8D", "8"), // dealer: 18
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    bet(&t, &room.id, "alice", 100).await.unwrap();
    t.engine
        .perform_action(&room.id, "alice", Action::Stand)
        .await
        .unwrap();

    assert_eq!(
        t.store.get_player(&room.id, "alice").await.unwrap().balance,
        1000
    );
}

#[tokio::test]
async fn test_double_doubles_bet_draws_once_and_ends_turn() {
    let t = table(vec![
        card("5S", "5"),
        card("6S", "6"), // alice: 11
        card("0D", "10"),
        card("8D", "8"), // dealer: 18
        card("0S", "10"), // double card: 21
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    bet(&t, &room.id, "alice", 100).await.unwrap();

    t.engine
        .perform_action(&room.id, "alice", Action::Double)
        .await
        .unwrap();

    // Bet doubled to 200, drew to 21 against a dealer 18: wins 400 back on
    // a net 200 debit.
    assert_eq!(
        t.store.get_player(&room.id, "alice").await.unwrap().balance,
        1200
    );
    let (stage, _) = t.store.get_stage_and_version(&room.id).await.unwrap();
    assert!(matches!(stage, Stage::Betting { .. }));
}

#[tokio::test]
async fn test_double_rejected_after_hitting() {
    let t = table(vec![
        card("2S", "2"),
        card("3S", "3"), // alice: 5
        card("0D", "10"),
        card("8D", "8"), // dealer
        card("4S", "4"), // alice hits to 9
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    bet(&t, &room.id, "alice", 100).await.unwrap();

    t.engine
        .perform_action(&room.id, "alice", Action::Hit)
        .await
        .unwrap();
    let err = t
        .engine
        .perform_action(&room.id, "alice", Action::Double)
        .await
        .unwrap_err();
    assert!(matches!(err, GameError::BadRequest(_)));
}

// ----------------------------------------------------------------------
// Deadlines
// ----------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_elapsed_betting_deadline_forced_once() {
    let t = table(vec![
        card("0S", "10"),
        card("9S", "9"),
        card("KS", "KING"),
        card("7S", "7"),
    ]);
    // One-second betting window so the deadline genuinely elapses.
    let room = t
        .engine
        .create_room("alice", "blackjack", config(1, 60))
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    bet(&t, &room.id, "alice", 100).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

    // A sweep and a racing caller both observe the elapsed deadline; only
    // one performs the transition.
    let (first, second) = tokio::join!(
        t.engine.force_advance(&room.id),
        t.engine.force_advance(&room.id)
    );
    let advanced = [first.unwrap(), second.unwrap()];
    assert_eq!(advanced.iter().filter(|a| **a).count(), 1);

    // Bob never bet and was skipped: only alice's hand plus the dealer.
    let hands = t.store.list_hands_for_room(&room.id).await.unwrap();
    assert_eq!(hands.len(), 2);
    assert_eq!(hands[0].user_id.as_deref(), Some("alice"));
    let (stage, _) = t.store.get_stage_and_version(&room.id).await.unwrap();
    assert!(matches!(
        stage,
        Stage::PlayerAction {
            player_index: 0,
            hand_index: 0,
            ..
        }
    ));
}

#[tokio::test]
async fn test_betting_deadline_with_no_bets_abandons_round() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(1, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    let (_, version_before) = t.store.get_stage_and_version(&room.id).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    assert!(t.engine.force_advance(&room.id).await.unwrap());

    // No dealing happened; the machine looped straight into a fresh
    // betting window.
    let (stage, version) = t.store.get_stage_and_version(&room.id).await.unwrap();
    assert!(matches!(stage, Stage::Betting { ref bets, .. } if bets.is_empty()));
    assert!(version > version_before);
    assert!(t.store.list_hands_for_room(&room.id).await.unwrap().is_empty());
    assert_eq!(t.deck.draw_calls(), 0);
}

#[tokio::test]
async fn test_turn_deadline_forces_stand() {
    let t = table(vec![
        card("0S", "10"),
        card("9S", "9"), // alice: 19
        card("0D", "10"),
        card("7D", "7"), // dealer: 17, stands
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 1))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    let mut sub = t.broadcaster.subscribe(&room.id);
    bet(&t, &room.id, "alice", 100).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;
    assert!(t.engine.force_advance(&room.id).await.unwrap());

    // The forced stand settled the round: 19 beats 17. Timing out also
    // parked alice away until she rejoins.
    let alice = t.store.get_player(&room.id, "alice").await.unwrap();
    assert_eq!(alice.balance, 1100);
    assert_eq!(alice.status, PlayerStatus::Away);

    let mut saw_forced_stand = false;
    while let Ok(event) = sub.receiver.try_recv() {
        if let Event::PlayerAction {
            user_id,
            action,
            forced,
            ..
        } = event
        {
            if user_id == "alice" && action == "stand" && forced {
                saw_forced_stand = true;
            }
        }
    }
    assert!(saw_forced_stand);
}

#[tokio::test]
async fn test_force_advance_is_a_noop_before_deadline() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();
    assert!(!t.engine.force_advance(&room.id).await.unwrap());
}

// ----------------------------------------------------------------------
// Provider failure
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_deck_outage_surfaces_provider_error() {
    let t = table(vec![]); // shoe is empty: every draw fails
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.start_game(&room.id, "alice").await.unwrap();

    let err = bet(&t, &room.id, "alice", 100).await.unwrap_err();
    assert!(matches!(err, GameError::Provider(_)));
}

// ----------------------------------------------------------------------
// Room lifecycle
// ----------------------------------------------------------------------

#[tokio::test]
async fn test_join_full_room_rejected() {
    let t = table(vec![]);
    let mut small = config(60, 60);
    small.max_players = 2;
    let room = t
        .engine
        .create_room("alice", "blackjack", small)
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();

    let err = t.engine.join_room(&room.id, "carol").await.unwrap_err();
    assert!(matches!(err, GameError::BadRequest(_)));
}

#[tokio::test]
async fn test_host_leaving_promotes_next_player() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();
    let mut sub = t.broadcaster.subscribe(&room.id);

    t.engine.leave_room(&room.id, "alice").await.unwrap();

    let fresh = t.store.get_room(&room.id).await.unwrap();
    assert_eq!(fresh.host_id, "bob");
    assert!(!fresh.ended);

    let mut saw_host_change = false;
    while let Ok(event) = sub.receiver.try_recv() {
        if let Event::HostChanged { host_id } = event {
            assert_eq!(host_id, "bob");
            saw_host_change = true;
        }
    }
    assert!(saw_host_change);
}

#[tokio::test]
async fn test_last_player_leaving_ends_room() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.leave_room(&room.id, "alice").await.unwrap();

    let fresh = t.store.get_room(&room.id).await.unwrap();
    assert!(fresh.ended);
    assert!(!fresh.active);

    let err = t.engine.join_room(&room.id, "bob").await.unwrap_err();
    assert!(matches!(err, GameError::BadRequest(_)));
}

#[tokio::test]
async fn test_rejoin_reactivates_left_seat() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    t.engine.join_room(&room.id, "bob").await.unwrap();
    t.engine.leave_room(&room.id, "bob").await.unwrap();

    let player = t.engine.join_room(&room.id, "bob").await.unwrap();
    assert_eq!(player.status, PlayerStatus::Active);
    assert_eq!(player.seat, 1);
}

#[tokio::test]
async fn test_chat_reaches_observers() {
    let t = table(vec![]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    let mut sub = t.broadcaster.subscribe(&room.id);

    t.engine.chat(&room.id, "alice", "good luck").await.unwrap();

    let mut saw_chat = false;
    while let Ok(event) = sub.receiver.try_recv() {
        if let Event::ChatMessage {
            user_id, message, ..
        } = event
        {
            assert_eq!(user_id, "alice");
            assert_eq!(message, "good luck");
            saw_chat = true;
        }
    }
    assert!(saw_chat);
}

#[tokio::test]
async fn test_game_state_events_are_ordered_by_version() {
    let t = table(vec![
        card("0S", "10"),
        card("9S", "9"),
        card("0D", "10"),
        card("7D", "7"),
    ]);
    let room = t
        .engine
        .create_room("alice", "blackjack", config(60, 60))
        .await
        .unwrap();
    let mut sub = t.broadcaster.subscribe(&room.id);

    t.engine.start_game(&room.id, "alice").await.unwrap();
    bet(&t, &room.id, "alice", 100).await.unwrap();
    t.engine
        .perform_action(&room.id, "alice", Action::Stand)
        .await
        .unwrap();

    let mut versions = Vec::new();
    while let Ok(event) = sub.receiver.try_recv() {
        if let Event::GameState { version, .. } = event {
            versions.push(version);
        }
    }
    assert!(!versions.is_empty());
    let mut sorted = versions.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(versions, sorted, "stage events arrived out of order");
}

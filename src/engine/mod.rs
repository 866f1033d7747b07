//! Game engine: validates inbound actions against the room's current stage,
//! computes transitions on a local copy, persists them through the
//! optimistic-version guard and emits the resulting events.
//!
//! The deadline scheduler drives elapsed stages through the same transition
//! code paths (`force_advance`), so a racing player action and a sweep can
//! never both win the same logical step.

pub mod round;
pub mod stage;

use crate::cards::hand_value;
use crate::config::GameConfig;
use crate::deck::DeckProvider;
use crate::errors::{GameError, GameResult};
use crate::events::{Broadcaster, DealerCard, Event};
use crate::store::{HandRow, PlayerStatus, Room, RoomPlayer, RoomStore, UserId};
use chrono::Utc;
use self::round::{
    classify, dealer_must_play, dealer_should_hit, hand_at, next_pointer, payout_for, HandPointer,
};
use self::stage::{Action, Stage};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Bounded retries for a synchronous action that loses the version race.
const MAX_CAS_RETRIES: u32 = 3;
/// Internal retries for deadline-forced transitions before giving up; the
/// racer that beat us has already performed the step.
const FORCED_RETRIES: u32 = 2;

const DEALER_PILE: &str = "dealer";

fn hand_pile(order_index: usize, hand_index: usize) -> String {
    format!("hand_{}_{}", order_index, hand_index)
}

pub struct GameEngine {
    store: Arc<dyn RoomStore>,
    deck: Arc<dyn DeckProvider>,
    broadcaster: Arc<Broadcaster>,
}

impl GameEngine {
    pub fn new(
        store: Arc<dyn RoomStore>,
        deck: Arc<dyn DeckProvider>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            store,
            deck,
            broadcaster,
        }
    }

    pub fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    // ------------------------------------------------------------------
    // Room lifecycle
    // ------------------------------------------------------------------

    /// Creates a room with the caller as host and first seated player.
    pub async fn create_room(
        &self,
        host_id: &str,
        game_mode: &str,
        config: GameConfig,
    ) -> GameResult<Room> {
        let room = Room {
            id: Uuid::new_v4().to_string(),
            host_id: host_id.to_string(),
            game_mode: game_mode.to_string(),
            deck_id: None,
            active: true,
            ended: false,
            min_players: config.min_players,
            max_players: config.max_players,
            config,
            created_at: Utc::now(),
        };
        self.store.create_room(room.clone()).await?;
        self.seat_player(&room, host_id, 0).await?;
        info!(room_id = %room.id, host_id, "room created");
        Ok(room)
    }

    /// Joins a room, or reactivates a previously-left seat.
    pub async fn join_room(&self, room_id: &str, user_id: &str) -> GameResult<RoomPlayer> {
        let room = self.store.get_room(room_id).await?;
        if room.ended {
            return Err(GameError::bad_request("room has ended"));
        }

        if let Ok(existing) = self.store.get_player(room_id, user_id).await {
            if existing.status == PlayerStatus::Active {
                return Err(GameError::bad_request("already seated in this room"));
            }
            let player = self
                .store
                .set_player_status(room_id, user_id, PlayerStatus::Active)
                .await?;
            self.broadcaster.publish(
                room_id,
                &Event::PlayerJoined {
                    user_id: user_id.to_string(),
                    seat: player.seat,
                    balance: player.balance,
                },
            );
            return Ok(player);
        }

        let players = self.store.list_players(room_id).await?;
        let active = players
            .iter()
            .filter(|p| p.status == PlayerStatus::Active)
            .count();
        if active >= room.max_players {
            return Err(GameError::bad_request("room is full"));
        }
        self.seat_player(&room, user_id, players.len()).await
    }

    async fn seat_player(&self, room: &Room, user_id: &str, seat: usize) -> GameResult<RoomPlayer> {
        let player = RoomPlayer {
            user_id: user_id.to_string(),
            room_id: room.id.clone(),
            seat,
            balance: room.config.starting_balance,
            balance_delta: 0,
            status: PlayerStatus::Active,
            joined_at: Utc::now(),
        };
        self.store.insert_player(player.clone()).await?;
        self.broadcaster.publish(
            &room.id,
            &Event::PlayerJoined {
                user_id: user_id.to_string(),
                seat,
                balance: player.balance,
            },
        );
        Ok(player)
    }

    /// Leaves a room. The host role moves to the longest-seated remaining
    /// active player; the last player out ends the room.
    pub async fn leave_room(&self, room_id: &str, user_id: &str) -> GameResult<()> {
        let player = self.store.get_player(room_id, user_id).await?;
        if player.status == PlayerStatus::Left {
            return Err(GameError::bad_request("already left this room"));
        }
        self.store
            .set_player_status(room_id, user_id, PlayerStatus::Left)
            .await?;
        self.broadcaster.publish(
            room_id,
            &Event::PlayerLeft {
                user_id: user_id.to_string(),
            },
        );

        let mut room = self.store.get_room(room_id).await?;
        let remaining = self.store.list_active_players(room_id).await?;
        if remaining.is_empty() {
            room.active = false;
            room.ended = true;
            self.store.update_room(room).await?;
            info!(room_id, "last player left, room ended");
            return Ok(());
        }
        if room.host_id == user_id {
            let next_host = remaining[0].user_id.clone();
            room.host_id = next_host.clone();
            self.store.update_room(room).await?;
            self.broadcaster
                .publish(room_id, &Event::HostChanged { host_id: next_host });
        }
        Ok(())
    }

    /// Relays a chat line to every room observer. Broadcast-only.
    pub async fn chat(&self, room_id: &str, user_id: &str, message: &str) -> GameResult<()> {
        let player = self.store.get_player(room_id, user_id).await?;
        if player.status == PlayerStatus::Left {
            return Err(GameError::bad_request("not seated in this room"));
        }
        self.broadcaster.publish(
            room_id,
            &Event::ChatMessage {
                user_id: user_id.to_string(),
                message: message.to_string(),
                sent_at: Utc::now(),
            },
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Game start and action dispatch
    // ------------------------------------------------------------------

    /// Host starts the game: allocates the shoe and opens the first round.
    pub async fn start_game(&self, room_id: &str, user_id: &str) -> GameResult<()> {
        let mut room = self.store.get_room(room_id).await?;
        if room.host_id != user_id {
            return Err(GameError::bad_request("only the host can start the game"));
        }
        let active = self.store.list_active_players(room_id).await?;
        if active.len() < room.min_players {
            return Err(GameError::bad_request(format!(
                "need at least {} seated players to start",
                room.min_players
            )));
        }
        let (stage, version) = self.store.get_stage_and_version(room_id).await?;
        if stage != Stage::NotStarted {
            return Err(GameError::bad_request(format!(
                "game already started (stage {})",
                stage.name()
            )));
        }

        let deck_id = self.deck.shuffle_deck().await?;
        room.deck_id = Some(deck_id);
        self.store.update_room(room.clone()).await?;

        self.commit_stage(room_id, &Stage::Init, version).await?;
        self.run_automatic(&room).await
    }

    /// Validates and applies one inbound player action.
    pub async fn perform_action(
        &self,
        room_id: &str,
        user_id: &str,
        action: Action,
    ) -> GameResult<()> {
        let room = self.store.get_room(room_id).await?;
        if room.ended {
            return Err(GameError::bad_request("room has ended"));
        }
        let player = self.store.get_player(room_id, user_id).await?;
        if player.status != PlayerStatus::Active {
            return Err(GameError::bad_request("not an active player in this room"));
        }

        match action {
            Action::Bet { amount } => self.place_bet(&room, user_id, amount).await,
            Action::Hit | Action::Stand | Action::Double => {
                self.turn_action(&room, user_id, action).await
            }
        }
    }

    /// Forces the transition an elapsed deadline demands. Returns whether
    /// this caller performed it; a lost race means another worker already
    /// did, which satisfies the same deadline.
    pub async fn force_advance(&self, room_id: &str) -> GameResult<bool> {
        let room = self.store.get_room(room_id).await?;
        if room.ended {
            return Ok(false);
        }

        for attempt in 0..=FORCED_RETRIES {
            let (stage, version) = self.store.get_stage_and_version(room_id).await?;
            let now = Utc::now();
            let result = match stage {
                Stage::Betting { deadline, bets } if now >= deadline => {
                    self.advance_from_betting(&room, bets, version, None).await
                }
                Stage::PlayerAction {
                    deadline,
                    player_index,
                    hand_index,
                } if now >= deadline => {
                    let pointer = HandPointer {
                        player_index,
                        hand_index,
                    };
                    self.forced_stand(&room, pointer, version).await
                }
                _ => return Ok(false),
            };

            match result {
                Ok(()) => return Ok(true),
                Err(GameError::Conflict(_)) if attempt < FORCED_RETRIES => {
                    debug!(room_id, attempt, "forced transition lost version race, re-reading");
                }
                Err(GameError::Conflict(_)) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    // ------------------------------------------------------------------
    // Betting
    // ------------------------------------------------------------------

    async fn place_bet(&self, room: &Room, user_id: &str, amount: i64) -> GameResult<()> {
        let config = &room.config;
        if amount < config.min_bet {
            return Err(GameError::bad_request(format!(
                "bet {} below table minimum {}",
                amount, config.min_bet
            )));
        }

        for _attempt in 0..MAX_CAS_RETRIES {
            let (stage, version) = self.store.get_stage_and_version(&room.id).await?;
            let (deadline, bets) = match stage {
                Stage::Betting { deadline, bets } => (deadline, bets),
                other => {
                    return Err(GameError::bad_request(format!(
                        "bet not accepted during {}",
                        other.name()
                    )))
                }
            };

            // Replace semantics: a repeat bet nets out the previous wager.
            let previous = bets.get(user_id).copied().unwrap_or(0);
            let player = self.store.get_player(&room.id, user_id).await?;
            if amount > player.balance + previous {
                return Err(GameError::bad_request(format!(
                    "bet {} exceeds balance {}",
                    amount,
                    player.balance + previous
                )));
            }

            let mut new_bets = bets;
            new_bets.insert(user_id.to_string(), amount);

            let active = self.store.list_active_players(&room.id).await?;
            let all_bet = active
                .iter()
                .all(|p| new_bets.contains_key(&p.user_id));
            let elapsed = Utc::now() >= deadline;

            if all_bet || elapsed {
                // The final (or late) bet advances the stage in this call.
                match self
                    .advance_from_betting(room, new_bets, version, Some((user_id, amount, previous)))
                    .await
                {
                    Ok(()) => return Ok(()),
                    Err(GameError::Conflict(_)) => continue,
                    Err(e) => return Err(e),
                }
            }

            match self
                .commit_stage(
                    &room.id,
                    &Stage::Betting {
                        deadline,
                        bets: new_bets,
                    },
                    version,
                )
                .await
            {
                Ok(_) => {
                    self.debit_bet(&room.id, user_id, amount, previous).await?;
                    self.broadcaster.publish(
                        &room.id,
                        &Event::PlayerAction {
                            user_id: user_id.to_string(),
                            action: "bet".to_string(),
                            amount: Some(amount),
                            forced: false,
                        },
                    );
                    return Ok(());
                }
                Err(GameError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(GameError::conflict(format!(
            "bet on room {} kept losing the version race",
            room.id
        )))
    }

    async fn debit_bet(
        &self,
        room_id: &str,
        user_id: &str,
        amount: i64,
        previous: i64,
    ) -> GameResult<()> {
        let delta = previous - amount;
        if delta == 0 {
            return Ok(());
        }
        if let Err(e) = self
            .store
            .adjust_player_balance(room_id, user_id, delta)
            .await
        {
            // The stage already records the bet; the books need an operator.
            error!(
                room_id,
                user_id,
                delta,
                error = %e,
                "bet debit failed after stage commit, manual reconciliation required"
            );
            return Err(GameError::Internal(format!(
                "bet recorded but balance update failed for {}",
                user_id
            )));
        }
        Ok(())
    }

    /// Shared Betting exit used by the final bet, a late bet and the
    /// deadline sweep. `placing` carries the in-flight bet to debit once the
    /// stage commit wins; forced advances pass `None`.
    async fn advance_from_betting(
        &self,
        room: &Room,
        bets: HashMap<UserId, i64>,
        version: u64,
        placing: Option<(&str, i64, i64)>,
    ) -> GameResult<()> {
        if bets.is_empty() {
            // Nobody wagered: abandon the round without dealing.
            self.commit_stage(&room.id, &Stage::Teardown, version).await?;
            info!(room_id = %room.id, "betting window closed with no bets, round abandoned");
            return self.run_automatic(room).await;
        }

        let next_version = self.commit_stage(&room.id, &Stage::Dealing, version).await?;
        if let Some((user_id, amount, previous)) = placing {
            self.debit_bet(&room.id, user_id, amount, previous).await?;
            self.broadcaster.publish(
                &room.id,
                &Event::PlayerAction {
                    user_id: user_id.to_string(),
                    action: "bet".to_string(),
                    amount: Some(amount),
                    forced: false,
                },
            );
        }
        self.deal(room, bets, next_version).await
    }

    // ------------------------------------------------------------------
    // Dealing
    // ------------------------------------------------------------------

    /// Executes the automatic Dealing stage: two cards to every bettor in
    /// turn order, then two to the dealer with the hole card face down.
    async fn deal(&self, room: &Room, bets: HashMap<UserId, i64>, version: u64) -> GameResult<()> {
        let deck_id = room
            .deck_id
            .clone()
            .ok_or_else(|| GameError::Internal("no deck allocated for room".to_string()))?;

        // Bettors keep their seat order; players who never bet sit the
        // round out.
        let active = self.store.list_active_players(&room.id).await?;
        let bettors: Vec<&RoomPlayer> = active
            .iter()
            .filter(|p| bets.contains_key(&p.user_id))
            .collect();
        if bettors.is_empty() {
            // Every bettor left before the cards went out.
            self.commit_stage(&room.id, &Stage::Teardown, version).await?;
            return self.run_automatic(room).await;
        }

        let mut player_hands = Vec::with_capacity(bettors.len());
        for (order_index, bettor) in bettors.iter().enumerate() {
            let mut hand = HandRow {
                id: 0,
                room_id: room.id.clone(),
                user_id: Some(bettor.user_id.clone()),
                order_index,
                hand_index: 0,
                bet: bets[&bettor.user_id],
                cards: Vec::new(),
            };
            hand.id = self.store.create_hand(hand.clone()).await?;
            player_hands.push(hand);
        }
        let mut dealer_hand = HandRow {
            id: 0,
            room_id: room.id.clone(),
            user_id: None,
            order_index: 0,
            hand_index: 0,
            bet: 0,
            cards: Vec::new(),
        };
        dealer_hand.id = self.store.create_hand(dealer_hand.clone()).await?;

        for hand in &mut player_hands {
            let pile = hand_pile(hand.order_index, hand.hand_index);
            hand.cards = self.deck.draw_cards(&deck_id, &pile, 2).await?;
            self.store.update_hand(hand.clone()).await?;
            let (score, _) = hand_value(&hand.cards);
            self.broadcaster.publish(
                &room.id,
                &Event::PlayerReveal {
                    user_id: hand.user_id.clone().unwrap_or_default(),
                    hand_index: hand.hand_index,
                    cards: hand.cards.clone(),
                    score,
                    outcome: None,
                    payout: None,
                },
            );
        }

        dealer_hand.cards = self.deck.draw_cards(&deck_id, DEALER_PILE, 2).await?;
        self.store.update_hand(dealer_hand.clone()).await?;
        self.broadcaster.publish(
            &room.id,
            &Event::DealerReveal {
                cards: vec![
                    DealerCard::face_up(dealer_hand.cards[0].clone()),
                    DealerCard::face_down(),
                ],
                score: None,
            },
        );

        self.commit_stage(
            &room.id,
            &Stage::PlayerAction {
                deadline: Utc::now() + room.config.turn_window(),
                player_index: 0,
                hand_index: 0,
            },
            version,
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Turn actions
    // ------------------------------------------------------------------

    async fn turn_action(&self, room: &Room, user_id: &str, action: Action) -> GameResult<()> {
        for _attempt in 0..MAX_CAS_RETRIES {
            let (stage, version) = self.store.get_stage_and_version(&room.id).await?;
            let pointer = match stage {
                Stage::PlayerAction {
                    player_index,
                    hand_index,
                    ..
                } => HandPointer {
                    player_index,
                    hand_index,
                },
                other => {
                    return Err(GameError::bad_request(format!(
                        "{} not accepted during {}",
                        action.name(),
                        other.name()
                    )))
                }
            };

            let hands = self.store.list_hands_for_room(&room.id).await?;
            let current = hand_at(&hands, pointer)
                .ok_or_else(|| {
                    GameError::Internal(format!(
                        "turn pointer ({}, {}) has no hand",
                        pointer.player_index, pointer.hand_index
                    ))
                })?
                .clone();
            if current.user_id.as_deref() != Some(user_id) {
                return Err(GameError::bad_request("not your turn"));
            }

            let result = match action {
                Action::Hit => self.apply_hit(room, &hands, &current, pointer, version).await,
                Action::Stand => {
                    self.apply_stand(room, &hands, user_id, pointer, version, false)
                        .await
                }
                Action::Double => {
                    self.apply_double(room, &hands, &current, pointer, version)
                        .await
                }
                Action::Bet { .. } => unreachable!("bets are dispatched separately"),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(GameError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(GameError::conflict(format!(
            "{} on room {} kept losing the version race",
            action.name(),
            room.id
        )))
    }

    async fn apply_hit(
        &self,
        room: &Room,
        hands: &[HandRow],
        current: &HandRow,
        pointer: HandPointer,
        version: u64,
    ) -> GameResult<()> {
        let deck_id = room
            .deck_id
            .clone()
            .ok_or_else(|| GameError::Internal("no deck allocated for room".to_string()))?;
        let pile = hand_pile(current.order_index, current.hand_index);
        let drawn = self.deck.draw_cards(&deck_id, &pile, 1).await?;

        let mut cards = current.cards.clone();
        cards.extend(drawn.iter().cloned());
        let (score, _) = hand_value(&cards);
        let busted = score > 21;

        let next_stage = if busted {
            self.stage_after_hand(room, hands, pointer)
        } else {
            Stage::PlayerAction {
                deadline: Utc::now() + room.config.turn_window(),
                player_index: pointer.player_index,
                hand_index: pointer.hand_index,
            }
        };

        match self.commit_stage(&room.id, &next_stage, version).await {
            Ok(_) => {}
            Err(e) => {
                // The drawn card stays consumed in the provider's pile.
                warn!(
                    room_id = %room.id,
                    card = %drawn[0].code,
                    "hit lost the version race, drawn card orphaned"
                );
                return Err(e);
            }
        }

        let mut updated = current.clone();
        updated.cards = cards;
        self.store.update_hand(updated.clone()).await?;

        let user_id = current.user_id.clone().unwrap_or_default();
        self.broadcaster.publish(
            &room.id,
            &Event::PlayerAction {
                user_id: user_id.clone(),
                action: "hit".to_string(),
                amount: None,
                forced: false,
            },
        );
        self.broadcaster.publish(
            &room.id,
            &Event::PlayerReveal {
                user_id,
                hand_index: current.hand_index,
                cards: updated.cards,
                score,
                outcome: None,
                payout: None,
            },
        );

        if next_stage == Stage::FinishRound {
            self.run_automatic(room).await?;
        }
        Ok(())
    }

    async fn apply_stand(
        &self,
        room: &Room,
        hands: &[HandRow],
        user_id: &str,
        pointer: HandPointer,
        version: u64,
        forced: bool,
    ) -> GameResult<()> {
        let next_stage = self.stage_after_hand(room, hands, pointer);
        self.commit_stage(&room.id, &next_stage, version).await?;
        self.broadcaster.publish(
            &room.id,
            &Event::PlayerAction {
                user_id: user_id.to_string(),
                action: "stand".to_string(),
                amount: None,
                forced,
            },
        );
        if next_stage == Stage::FinishRound {
            self.run_automatic(room).await?;
        }
        Ok(())
    }

    async fn apply_double(
        &self,
        room: &Room,
        hands: &[HandRow],
        current: &HandRow,
        pointer: HandPointer,
        version: u64,
    ) -> GameResult<()> {
        if current.cards.len() != 2 {
            return Err(GameError::bad_request(
                "double is only available on a two-card hand",
            ));
        }
        let extra = current.bet;
        let player = self
            .store
            .get_player(&room.id, current.user_id.as_deref().unwrap_or_default())
            .await?;
        if extra > player.balance {
            return Err(GameError::bad_request(format!(
                "doubling requires {} more chips, balance is {}",
                extra, player.balance
            )));
        }

        let deck_id = room
            .deck_id
            .clone()
            .ok_or_else(|| GameError::Internal("no deck allocated for room".to_string()))?;
        let pile = hand_pile(current.order_index, current.hand_index);
        let drawn = self.deck.draw_cards(&deck_id, &pile, 1).await?;

        // One card, then the turn ends whatever the total.
        let next_stage = self.stage_after_hand(room, hands, pointer);
        match self.commit_stage(&room.id, &next_stage, version).await {
            Ok(_) => {}
            Err(e) => {
                warn!(
                    room_id = %room.id,
                    card = %drawn[0].code,
                    "double lost the version race, drawn card orphaned"
                );
                return Err(e);
            }
        }

        let user_id = current.user_id.clone().unwrap_or_default();
        if let Err(e) = self
            .store
            .adjust_player_balance(&room.id, &user_id, -extra)
            .await
        {
            error!(
                room_id = %room.id,
                user_id,
                error = %e,
                "double debit failed after stage commit, manual reconciliation required"
            );
        }

        let mut updated = current.clone();
        updated.bet += extra;
        updated.cards.extend(drawn.iter().cloned());
        let (score, _) = hand_value(&updated.cards);
        self.store.update_hand(updated.clone()).await?;

        self.broadcaster.publish(
            &room.id,
            &Event::PlayerAction {
                user_id: user_id.clone(),
                action: "double".to_string(),
                amount: Some(extra),
                forced: false,
            },
        );
        self.broadcaster.publish(
            &room.id,
            &Event::PlayerReveal {
                user_id,
                hand_index: current.hand_index,
                cards: updated.cards,
                score,
                outcome: None,
                payout: None,
            },
        );

        if next_stage == Stage::FinishRound {
            self.run_automatic(room).await?;
        }
        Ok(())
    }

    async fn forced_stand(
        &self,
        room: &Room,
        pointer: HandPointer,
        version: u64,
    ) -> GameResult<()> {
        let hands = self.store.list_hands_for_room(&room.id).await?;
        let user_id = hand_at(&hands, pointer)
            .and_then(|h| h.user_id.clone())
            .unwrap_or_default();
        self.apply_stand(room, &hands, &user_id, pointer, version, true)
            .await?;
        // A timed-out player sits out until they rejoin.
        if !user_id.is_empty() {
            self.store
                .set_player_status(&room.id, &user_id, PlayerStatus::Away)
                .await?;
        }
        Ok(())
    }

    /// Next stage once the pointed-at hand's turn is over: the following
    /// hand in turn order, or FinishRound after the last one.
    fn stage_after_hand(&self, room: &Room, hands: &[HandRow], pointer: HandPointer) -> Stage {
        match next_pointer(hands, pointer) {
            Some(next) => Stage::PlayerAction {
                deadline: Utc::now() + room.config.turn_window(),
                player_index: next.player_index,
                hand_index: next.hand_index,
            },
            None => Stage::FinishRound,
        }
    }

    // ------------------------------------------------------------------
    // Automatic stages
    // ------------------------------------------------------------------

    /// Drives consecutive automatic stages until the machine parks on a
    /// stage that waits for input (or the room ends). Only the worker whose
    /// commit entered the automatic stage runs this, so effects execute
    /// exactly once; the version guard still protects every write.
    async fn run_automatic(&self, room: &Room) -> GameResult<()> {
        loop {
            let (stage, version) = self.store.get_stage_and_version(&room.id).await?;
            match stage {
                Stage::Init => {
                    self.commit_stage(&room.id, &Stage::Setup, version).await?;
                }
                Stage::Setup => {
                    let betting = Stage::Betting {
                        deadline: Utc::now() + room.config.betting_window(),
                        bets: HashMap::new(),
                    };
                    self.commit_stage(&room.id, &betting, version).await?;
                }
                Stage::FinishRound => {
                    self.finish_round(room, version).await?;
                }
                Stage::Teardown => {
                    if !self.teardown(room, version).await? {
                        return Ok(());
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Dealer reveal and draw-out, hand comparison, payouts.
    async fn finish_round(&self, room: &Room, version: u64) -> GameResult<()> {
        let deck_id = room
            .deck_id
            .clone()
            .ok_or_else(|| GameError::Internal("no deck allocated for room".to_string()))?;
        let hands = self.store.list_hands_for_room(&room.id).await?;
        let mut dealer = hands
            .iter()
            .find(|h| h.is_dealer())
            .cloned()
            .ok_or_else(|| GameError::Internal("round has no dealer hand".to_string()))?;

        if dealer_must_play(&hands) {
            while dealer_should_hit(&dealer.cards) {
                let drawn = self.deck.draw_cards(&deck_id, DEALER_PILE, 1).await?;
                dealer.cards.extend(drawn);
            }
            self.store.update_hand(dealer.clone()).await?;
        }

        let (dealer_score, _) = hand_value(&dealer.cards);
        self.broadcaster.publish(
            &room.id,
            &Event::DealerReveal {
                cards: dealer
                    .cards
                    .iter()
                    .cloned()
                    .map(DealerCard::face_up)
                    .collect(),
                score: Some(dealer_score),
            },
        );

        for hand in hands.iter().filter(|h| !h.is_dealer()) {
            let outcome = classify(&hand.cards, &dealer.cards);
            let payout = payout_for(outcome, hand.bet, room.config.blackjack_payout);
            let user_id = hand.user_id.clone().unwrap_or_default();
            if payout > 0 {
                if let Err(e) = self
                    .store
                    .adjust_player_balance(&room.id, &user_id, payout)
                    .await
                {
                    // Keep settling the other hands; this one needs an
                    // operator to reconcile.
                    error!(
                        room_id = %room.id,
                        user_id,
                        payout,
                        error = %e,
                        "payout failed mid-settlement, manual reconciliation required"
                    );
                }
            }
            let (score, _) = hand_value(&hand.cards);
            self.broadcaster.publish(
                &room.id,
                &Event::PlayerReveal {
                    user_id,
                    hand_index: hand.hand_index,
                    cards: hand.cards.clone(),
                    score,
                    outcome: Some(outcome),
                    payout: Some(payout),
                },
            );
        }

        self.commit_stage(&room.id, &Stage::Teardown, version).await?;
        Ok(())
    }

    /// Round cleanup. Returns true when the machine should loop into the
    /// next round's Init, false when the room is done.
    async fn teardown(&self, room: &Room, version: u64) -> GameResult<bool> {
        self.store.clear_hands(&room.id).await?;

        if room.config.reset_balance_each_round {
            for player in self.store.list_active_players(&room.id).await? {
                let delta = room.config.starting_balance - player.balance;
                if delta != 0 {
                    self.store
                        .adjust_player_balance(&room.id, &player.user_id, delta)
                        .await?;
                }
            }
        }

        let fresh = self.store.get_room(&room.id).await?;
        let remaining = self.store.list_active_players(&room.id).await?;
        if fresh.ended || !fresh.active || remaining.is_empty() {
            let mut closing = fresh;
            closing.active = false;
            closing.ended = true;
            self.store.update_room(closing).await?;
            info!(room_id = %room.id, "room closed at round teardown");
            return Ok(false);
        }

        self.commit_stage(&room.id, &Stage::Init, version).await?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Persistence guard
    // ------------------------------------------------------------------

    /// Conditioned stage write. On success the new stage is broadcast as a
    /// `game_state` event carrying the new version; on a lost race the
    /// caller gets Conflict and decides whether to re-read.
    async fn commit_stage(&self, room_id: &str, stage: &Stage, expected: u64) -> GameResult<u64> {
        if self
            .store
            .write_stage_if_version_matches(room_id, stage, expected)
            .await?
        {
            let version = expected + 1;
            debug!(room_id, version, stage = stage.name(), "stage committed");
            self.broadcaster.publish(
                room_id,
                &Event::GameState {
                    version,
                    stage: stage.clone(),
                },
            );
            Ok(version)
        } else {
            Err(GameError::conflict(format!(
                "room {} moved past version {}",
                room_id, expected
            )))
        }
    }
}

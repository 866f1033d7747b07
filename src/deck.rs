//! Deck provider client: the external card-shuffling service boundary.
//!
//! Treated as unreliable I/O. Every call has a request timeout and a small
//! bounded retry count; exhausting retries surfaces a provider error that
//! aborts the current transition.

use crate::cards::Card;
use crate::config::DeckConfig;
use crate::errors::{GameError, GameResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Card-dealing service interface.
#[async_trait]
pub trait DeckProvider: Send + Sync {
    /// Allocates and shuffles a new shoe, returning its identifier.
    async fn shuffle_deck(&self) -> GameResult<String>;

    /// Draws `count` cards off the shoe into the named pile and returns
    /// them in draw order.
    async fn draw_cards(&self, deck_id: &str, pile_id: &str, count: usize)
        -> GameResult<Vec<Card>>;

    /// Lists the cards currently in a pile.
    async fn list_pile(&self, deck_id: &str, pile_id: &str) -> GameResult<Vec<Card>>;
}

#[derive(Debug, Deserialize)]
struct ShuffleResponse {
    success: bool,
    deck_id: String,
}

#[derive(Debug, Deserialize)]
struct DrawResponse {
    success: bool,
    cards: Vec<Card>,
}

#[derive(Debug, Deserialize)]
struct PileActionResponse {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct PileListResponse {
    success: bool,
    piles: HashMap<String, PileContents>,
}

#[derive(Debug, Deserialize)]
struct PileContents {
    #[serde(default)]
    cards: Vec<Card>,
}

/// HTTP client for a deckofcardsapi-compatible provider.
pub struct HttpDeckProvider {
    client: reqwest::Client,
    config: DeckConfig,
}

impl HttpDeckProvider {
    pub fn new(config: DeckConfig) -> GameResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GameError::Provider(format!("failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> GameResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GameError::Provider(format!("request to {} failed: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(GameError::Provider(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| GameError::Provider(format!("invalid response from {}: {}", url, e)))
    }

    async fn try_shuffle(&self) -> GameResult<String> {
        let url = format!(
            "{}/api/deck/new/shuffle/?deck_count={}",
            self.config.base_url, self.config.deck_count
        );
        let response: ShuffleResponse = self.get_json(&url).await?;
        if !response.success {
            return Err(GameError::Provider("shuffle rejected by provider".to_string()));
        }
        Ok(response.deck_id)
    }

    async fn try_draw(&self, deck_id: &str, pile_id: &str, count: usize) -> GameResult<Vec<Card>> {
        let url = format!(
            "{}/api/deck/{}/draw/?count={}",
            self.config.base_url, deck_id, count
        );
        let response: DrawResponse = self.get_json(&url).await?;
        if !response.success || response.cards.len() != count {
            return Err(GameError::Provider(format!(
                "draw of {} cards rejected by provider",
                count
            )));
        }

        // Record the drawn cards into the hand's pile so the pile listing
        // stays the authoritative view of the hand.
        let codes: Vec<&str> = response.cards.iter().map(|c| c.code.as_str()).collect();
        let url = format!(
            "{}/api/deck/{}/pile/{}/add/?cards={}",
            self.config.base_url,
            deck_id,
            pile_id,
            codes.join(",")
        );
        let pile: PileActionResponse = self.get_json(&url).await?;
        if !pile.success {
            return Err(GameError::Provider(format!(
                "pile add for {} rejected by provider",
                pile_id
            )));
        }

        Ok(response.cards)
    }

    async fn try_list_pile(&self, deck_id: &str, pile_id: &str) -> GameResult<Vec<Card>> {
        let url = format!(
            "{}/api/deck/{}/pile/{}/list/",
            self.config.base_url, deck_id, pile_id
        );
        let response: PileListResponse = self.get_json(&url).await?;
        if !response.success {
            return Err(GameError::Provider(format!(
                "pile list for {} rejected by provider",
                pile_id
            )));
        }
        Ok(response
            .piles
            .get(pile_id)
            .map(|p| p.cards.clone())
            .unwrap_or_default())
    }
}

macro_rules! with_retries {
    ($self:ident, $op:literal, $call:expr) => {{
        let mut last_err = None;
        for attempt in 0..=$self.config.max_retries {
            match $call.await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(attempt, op = $op, error = %e, "deck call attempt failed");
                    last_err = Some(e);
                    if attempt < $self.config.max_retries {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| GameError::Provider(concat!($op, " failed").to_string())))
    }};
}

#[async_trait]
impl DeckProvider for HttpDeckProvider {
    async fn shuffle_deck(&self) -> GameResult<String> {
        with_retries!(self, "shuffle", self.try_shuffle())
    }

    async fn draw_cards(
        &self,
        deck_id: &str,
        pile_id: &str,
        count: usize,
    ) -> GameResult<Vec<Card>> {
        with_retries!(self, "draw", self.try_draw(deck_id, pile_id, count))
    }

    async fn list_pile(&self, deck_id: &str, pile_id: &str) -> GameResult<Vec<Card>> {
        with_retries!(self, "pile list", self.try_list_pile(deck_id, pile_id))
    }
}

/// Deterministic in-process provider for tests: deals a preloaded card
/// sequence in order and tracks pile membership.
pub struct StubDeckProvider {
    queue: Mutex<VecDeque<Card>>,
    piles: Mutex<HashMap<String, Vec<Card>>>,
    draw_calls: AtomicU64,
}

impl StubDeckProvider {
    pub fn new(cards: Vec<Card>) -> Self {
        Self {
            queue: Mutex::new(cards.into()),
            piles: Mutex::new(HashMap::new()),
            draw_calls: AtomicU64::new(0),
        }
    }

    /// An empty stub; every draw fails, for provider-outage tests.
    pub fn exhausted() -> Self {
        Self::new(Vec::new())
    }

    /// Appends more cards to the tail of the shoe.
    pub fn push_cards(&self, cards: Vec<Card>) {
        self.queue.lock().unwrap().extend(cards);
    }

    pub fn draw_calls(&self) -> u64 {
        self.draw_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeckProvider for StubDeckProvider {
    async fn shuffle_deck(&self) -> GameResult<String> {
        self.piles.lock().unwrap().clear();
        Ok("stub-deck".to_string())
    }

    async fn draw_cards(
        &self,
        _deck_id: &str,
        pile_id: &str,
        count: usize,
    ) -> GameResult<Vec<Card>> {
        self.draw_calls.fetch_add(1, Ordering::Relaxed);
        let mut queue = self.queue.lock().unwrap();
        if queue.len() < count {
            return Err(GameError::Provider(format!(
                "stub shoe exhausted: wanted {}, have {}",
                count,
                queue.len()
            )));
        }
        let cards: Vec<Card> = queue.drain(..count).collect();
        self.piles
            .lock()
            .unwrap()
            .entry(pile_id.to_string())
            .or_default()
            .extend(cards.clone());
        Ok(cards)
    }

    async fn list_pile(&self, _deck_id: &str, pile_id: &str) -> GameResult<Vec<Card>> {
        Ok(self
            .piles
            .lock()
            .unwrap()
            .get(pile_id)
            .cloned()
            .unwrap_or_default())
    }
}

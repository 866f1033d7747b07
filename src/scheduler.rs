//! Deadline scheduler: a fixed-tick sweep that forces elapsed stages
//! forward through the engine's own transition path, so a sweep and a live
//! player action go through the identical version guard.

use crate::engine::GameEngine;
use crate::store::RoomStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

pub struct DeadlineScheduler {
    engine: Arc<GameEngine>,
    store: Arc<dyn RoomStore>,
    tick: Duration,
}

impl DeadlineScheduler {
    pub fn new(engine: Arc<GameEngine>, store: Arc<dyn RoomStore>, tick: Duration) -> Self {
        Self {
            engine,
            store,
            tick,
        }
    }

    /// Spawns the sweep loop on the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        info!(tick_ms = self.tick.as_millis() as u64, "deadline scheduler started");
        tokio::spawn(async move {
            let mut ticker = interval(self.tick);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// One pass over every active room; rooms whose stage deadline has
    /// elapsed get the transition a timed-out player would have triggered.
    pub async fn sweep(&self) {
        let rooms = match self.store.list_active_rooms().await {
            Ok(rooms) => rooms,
            Err(e) => {
                warn!(error = %e, "deadline sweep could not list rooms");
                return;
            }
        };

        let now = Utc::now();
        for room in rooms {
            let due = match self.store.get_stage_and_version(&room.id).await {
                Ok((stage, _)) => stage.deadline().map_or(false, |d| now >= d),
                Err(e) => {
                    warn!(room_id = %room.id, error = %e, "deadline sweep could not read stage");
                    continue;
                }
            };
            if !due {
                continue;
            }

            match self.engine.force_advance(&room.id).await {
                Ok(true) => info!(room_id = %room.id, "deadline elapsed, stage forced forward"),
                // Someone else advanced it first; the deadline is satisfied.
                Ok(false) => debug!(room_id = %room.id, "deadline already handled"),
                Err(e) => warn!(room_id = %room.id, error = %e, "forced transition failed"),
            }
        }
    }
}

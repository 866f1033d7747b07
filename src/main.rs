//! Cardroom server binary.

use cardroom::api::ApiServer;
use cardroom::config::CardroomConfig;
use cardroom::deck::HttpDeckProvider;
use cardroom::engine::GameEngine;
use cardroom::events::Broadcaster;
use cardroom::scheduler::DeadlineScheduler;
use cardroom::store::{MemoryRoomStore, RoomStore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "cardroom", about = "Multiplayer blackjack room server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardroom=info,tower_http=info".into()),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => CardroomConfig::load_from_file(path)?,
        None => CardroomConfig::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    let store: Arc<dyn RoomStore> = Arc::new(MemoryRoomStore::new());
    let deck = Arc::new(HttpDeckProvider::new(config.deck.clone())?);
    let broadcaster = Arc::new(Broadcaster::default());
    let engine = Arc::new(GameEngine::new(
        store.clone(),
        deck,
        broadcaster.clone(),
    ));

    info!(
        deck_provider = %config.deck.base_url,
        tick_ms = config.scheduler.tick_ms,
        "cardroom starting"
    );

    DeadlineScheduler::new(engine.clone(), store.clone(), config.scheduler.tick_interval())
        .spawn();

    ApiServer::new(config, engine, store, broadcaster).run().await
}

//! API server setup: middleware stack, listener and graceful shutdown.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::CardroomConfig;
use crate::engine::GameEngine;
use crate::events::Broadcaster;
use crate::store::RoomStore;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    config: CardroomConfig,
    engine: Arc<GameEngine>,
    store: Arc<dyn RoomStore>,
    broadcaster: Arc<Broadcaster>,
}

impl ApiServer {
    pub fn new(
        config: CardroomConfig,
        engine: Arc<GameEngine>,
        store: Arc<dyn RoomStore>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            config,
            engine,
            store,
            broadcaster,
        }
    }

    /// Start the server and block until shutdown.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.socket_addr()?;
        let app = self.create_app();

        info!("Starting cardroom server");
        info!("   Listen: http://{}", addr);
        info!("   Endpoints:");
        info!("   GET  /health                - Health check");
        info!("   POST /rooms                 - Create room");
        info!("   GET  /rooms                 - Room list");
        info!("   GET  /rooms/:id             - Room state read");
        info!("   POST /rooms/:id/actions     - Player action");
        info!("   GET  /rooms/:id/ws          - Event stream");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped gracefully");
        Ok(())
    }

    /// Create the application with the middleware stack.
    fn create_app(&self) -> axum::Router {
        let state = Arc::new(AppState {
            engine: self.engine.clone(),
            store: self.store.clone(),
            broadcaster: self.broadcaster.clone(),
            config: self.config.clone(),
        });

        create_router(state)
            // Request ID middleware (first for tracing)
            .layer(axum::middleware::from_fn(request_id_middleware))
            // CORS layer (before timeout to handle preflight)
            .layer(create_cors_layer(self.config.server.allowed_origins.clone()))
            // Timeout layer
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.server.request_timeout_secs,
            )))
            // Tracing layer (last for complete request tracing)
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.server.host.parse::<std::net::IpAddr>()?,
            self.config.server.port,
        )))
    }
}

/// Wait for a shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}

//! HTTP/WebSocket surface over the game engine.
//!
//! Controllers here are glue: request parsing, error mapping and the event
//! stream bridge. All game semantics live in the engine.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod ws;

pub use server::ApiServer;

//! Client-facing API
//!
//! HTTP health surface plus the WebSocket endpoint every editor connects
//! through.

pub mod handlers;
pub mod routes;
pub mod ws;

pub use routes::{create_router, AppState};

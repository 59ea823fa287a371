//! Real-time collaborative graph editing backbone
//!
//! This crate provides the server side of a multi-user visual workflow
//! editor: every graph (and node-config) lives in memory on exactly one
//! process, edits stream between peers over WebSockets with ordering and
//! catch-up guarantees, and a diff-based flusher persists changes without
//! stalling editors.
//!
//! The three subsystems:
//!
//! - [`session`]: per-instance in-memory state, instruction application,
//!   fan-out, history and diff-based auto-save.
//! - [`cluster`]: peer discovery through a shared registry, instance
//!   ownership routing, and broadcast + request/response messaging.
//! - [`db`]: the store adapter, typed collections over SQLite with
//!   composite-key translation.
//!
//! The instruction language itself lives in the pure `graphedit-core`
//! crate, shared with clients.

pub mod api;
pub mod auth;
pub mod cluster;
pub mod config;
pub mod db;
pub mod session;

pub use api::{create_router, AppState};
pub use cluster::ClusterCoordinator;
pub use config::ServerConfig;
pub use db::DatabaseConnection;
pub use session::SessionManager;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

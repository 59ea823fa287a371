//! API route definitions

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::{handlers, ws};
use crate::auth::AuthProvider;
use crate::cluster::ClusterCoordinator;
use crate::db::DatabaseConnection;
use crate::session::SessionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub manager: Arc<SessionManager>,
    pub cluster: Arc<ClusterCoordinator>,
    pub auth: Arc<dyn AuthProvider>,
}

impl AppState {
    /// Peer identity for diagnostics
    pub fn manager_peer_id(&self) -> String {
        self.cluster.peer_id().to_string()
    }
}

/// Build the complete router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoints
        .route("/health", get(handlers::health))
        .route("/api/v1/system/health", get(handlers::health_detailed))
        // The collaboration socket
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

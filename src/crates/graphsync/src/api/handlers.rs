//! HTTP API handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::api::routes::AppState;

/// Basic liveness check
///
/// GET /health
pub async fn health() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Detailed health: database reachability plus session/cluster counters
///
/// GET /api/v1/system/health
pub async fn health_detailed(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database_ok = state.db.health_check().await.is_ok();
    let status = if database_ok { "ok" } else { "degraded" };

    let body = json!({
        "status": status,
        "data": {
            "database": database_ok,
            "peer_id": state.manager_peer_id(),
            "instances": state.manager.instance_count(),
            "connections": state.manager.connection_count(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }
    });

    let code = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

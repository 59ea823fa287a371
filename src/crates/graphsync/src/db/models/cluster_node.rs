//! Cluster registry row model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row per server process in the shared registry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClusterNodeRow {
    /// Process identity (stable for the process lifetime)
    pub peer_id: String,

    /// Reachable host
    pub host: String,

    /// HTTP base port; cluster sockets are at fixed offsets from it
    pub port: i64,

    /// "online" or "offline"
    pub status: String,

    /// Heartbeat timestamp (RFC3339 string)
    pub last_refresh: String,
}

impl ClusterNodeRow {
    /// Status value for a live process
    pub const ONLINE: &'static str = "online";
    /// Status value written on graceful shutdown
    pub const OFFLINE: &'static str = "offline";

    /// Create an online row stamped with the current time
    pub fn online(peer_id: &str, host: &str, port: u16) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            host: host.to_string(),
            port: port as i64,
            status: Self::ONLINE.to_string(),
            last_refresh: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Check the row advertises a live process
    pub fn is_online(&self) -> bool {
        self.status == Self::ONLINE
    }
}

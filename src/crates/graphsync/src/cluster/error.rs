//! Cluster error types

use thiserror::Error;

use crate::db::StoreError;

/// Errors surfaced by the cluster coordinator
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Direct request got no reply within the timeout
    #[error("Direct request to {peer_id} timed out after {timeout_ms}ms")]
    Timeout { peer_id: String, timeout_ms: u64 },

    /// Target peer is not in the connected set
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    /// Claim refused because the map already shows another owner
    #[error("Instance {instance_key} already owned by {owner}")]
    AlreadyOwned { instance_key: String, owner: String },

    /// Socket failure
    #[error("Cluster socket error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope (de)serialization failure
    #[error("Envelope serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Registry read/write failure
    #[error("Registry error: {0}")]
    Registry(#[from] StoreError),
}

impl ClusterError {
    /// Check if this is a direct-send timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClusterError::Timeout { .. })
    }
}

/// Result type for cluster operations
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

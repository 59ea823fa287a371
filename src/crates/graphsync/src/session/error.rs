//! Session error types
//!
//! Request-scoped errors become `{ok:false, message}` replies to the
//! originator; protocol violations close the socket instead. Instance
//! state is never partially mutated on error.

use graphedit_core::ProtocolError;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::db::StoreError;

/// Errors surfaced by the session manager
#[derive(Debug, Error)]
pub enum SessionError {
    /// Instance, sheet, node or edge does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request payload failed validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Key already present in the instance or the used-ID set
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    /// Instance is loaded on another peer; the client should reconnect there
    #[error("Instance {instance_key} handled elsewhere by {peer_id}")]
    OwnedElsewhere {
        instance_key: String,
        peer_id: String,
        host: String,
        port: u16,
    },

    /// Sheet operation refused by graph policy
    #[error("Sheet policy: {0}")]
    SheetPolicy(String),

    /// Instruction batch exceeded the cap; the socket is closed
    #[error("Instruction batch of {size} exceeds cap of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// Edit attempted on a socket with no instance binding; the socket is closed
    #[error("Socket has no registered instance")]
    NotRegistered,

    /// Instruction engine error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cluster failure
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl SessionError {
    /// Whether the error must close the socket instead of replying
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            SessionError::BatchTooLarge { .. } | SessionError::NotRegistered
        )
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        SessionError::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        SessionError::NotFound(what.into())
    }
}

/// Result type for session operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violations() {
        assert!(SessionError::BatchTooLarge { size: 21, max: 20 }.is_protocol_violation());
        assert!(SessionError::NotRegistered.is_protocol_violation());
        assert!(!SessionError::not_found("node n1").is_protocol_violation());
    }
}

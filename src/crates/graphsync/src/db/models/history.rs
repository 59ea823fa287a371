//! Undo/redo history batch model

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One persisted undo/redo batch
///
/// Appended on every flush with all entries queued since the previous
/// flush; the key is timestamped so batches list in order.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HistoryRow {
    /// Timestamped key `"{graph_key}-{millis}"`
    pub key: String,

    /// Owning graph
    pub graph_key: String,

    /// Batch timestamp (RFC3339 string)
    pub created_at: String,

    /// Serialized undo/redo entries
    pub entries: String,
}

impl HistoryRow {
    /// Create a batch row stamped with the current time
    pub fn new(graph_key: &str, entries: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            key: format!("{}-{}", graph_key, now.timestamp_millis()),
            graph_key: graph_key.to_string(),
            created_at: now.to_rfc3339(),
            entries,
        }
    }
}

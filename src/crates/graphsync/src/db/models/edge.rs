//! Edge row model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::db::{composite_key, StoreResult};

/// Represents an edge document in the store
///
/// `source_key`/`target_key` are the graph-store references (`_from`/`_to`)
/// pointing at node composite keys.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EdgeRow {
    /// Composite key `"{graph_key}-{local_key}"`
    pub key: String,

    /// Owning graph
    pub graph_key: String,

    /// Key unique within the graph (base-36)
    pub local_key: String,

    /// Sheet partition
    pub sheet_id: String,

    /// Source node composite key
    pub source_key: String,

    /// Target node composite key
    pub target_key: String,

    /// Full edge document as JSON
    pub doc: String,
}

impl EdgeRow {
    /// Build a row from an in-memory edge document
    ///
    /// `source`/`target` are localKeys; the composite translation happens
    /// here.
    pub fn from_doc(
        graph_key: &str,
        local_key: &str,
        sheet_id: &str,
        source: &str,
        target: &str,
        doc: &Value,
    ) -> StoreResult<Self> {
        Ok(Self {
            key: composite_key(graph_key, local_key),
            graph_key: graph_key.to_string(),
            local_key: local_key.to_string(),
            sheet_id: sheet_id.to_string(),
            source_key: composite_key(graph_key, source),
            target_key: composite_key(graph_key, target),
            doc: serde_json::to_string(doc)?,
        })
    }

    /// Parse the stored document
    pub fn document(&self) -> StoreResult<Value> {
        Ok(serde_json::from_str(&self.doc)?)
    }
}

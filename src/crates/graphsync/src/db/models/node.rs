//! Node row model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::db::{composite_key, StoreResult};

/// Represents a node document in the store
///
/// `doc` is the full JSON document the session layer edits; the remaining
/// columns are the indexed envelope used for graph/sheet queries.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeRow {
    /// Composite key `"{graph_key}-{local_key}"`
    pub key: String,

    /// Owning graph
    pub graph_key: String,

    /// Key unique within the graph (base-36)
    pub local_key: String,

    /// Sheet partition
    pub sheet_id: String,

    /// Full node document as JSON
    pub doc: String,
}

impl NodeRow {
    /// Build a row from an in-memory node document
    pub fn from_doc(graph_key: &str, local_key: &str, sheet_id: &str, doc: &Value) -> StoreResult<Self> {
        Ok(Self {
            key: composite_key(graph_key, local_key),
            graph_key: graph_key.to_string(),
            local_key: local_key.to_string(),
            sheet_id: sheet_id.to_string(),
            doc: serde_json::to_string(doc)?,
        })
    }

    /// Parse the stored document
    pub fn document(&self) -> StoreResult<Value> {
        Ok(serde_json::from_str(&self.doc)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_doc_composes_key() {
        let doc = json!({"key": "n1", "sheet": "0", "type": "pump"});
        let row = NodeRow::from_doc("g1", "n1", "0", &doc).unwrap();
        assert_eq!(row.key, "g1-n1");
        assert_eq!(row.document().unwrap(), doc);
    }
}

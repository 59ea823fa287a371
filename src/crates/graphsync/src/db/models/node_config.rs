//! Node-config row model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::db::StoreResult;

/// Represents a node configuration document in the store
///
/// Node configs are edited through the same session machinery as graphs;
/// `doc` holds the content tree (HTML-object structure, node template,
/// border, icon) as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeConfigRow {
    /// Config key (referenced by nodes via their `type` field)
    pub key: String,

    /// Owning workspace
    pub workspace: String,

    /// Config version
    pub version: i64,

    /// Display name shown in the node palette
    pub display_name: String,

    /// Palette category
    pub category: String,

    /// Full content document as JSON
    pub doc: String,

    /// Creation timestamp (RFC3339 string)
    pub created_at: String,

    /// Last update timestamp (RFC3339 string)
    pub updated_at: String,
}

impl NodeConfigRow {
    /// Create a new config row
    pub fn new(key: String, display_name: String, doc: &Value) -> StoreResult<Self> {
        let now = chrono::Utc::now().to_rfc3339();
        Ok(Self {
            key,
            workspace: String::new(),
            version: 1,
            display_name,
            category: String::new(),
            doc: serde_json::to_string(doc)?,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Parse the stored content document
    pub fn document(&self) -> StoreResult<Value> {
        Ok(serde_json::from_str(&self.doc)?)
    }
}

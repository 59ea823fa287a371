//! Graph metadata model

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::StoreResult;

/// Represents a graph in the store
///
/// Nodes and edges live in their own collections keyed by `graph_key`; this
/// row holds the metadata and the sheet list (a JSON map sheetId → display
/// name).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GraphRow {
    /// Graph key (unique across the deployment)
    pub key: String,

    /// Display name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// Owning workspace
    pub workspace: String,

    /// JSON map sheetId -> display name
    pub sheet_list: String,

    /// Metadata flag: the graph refuses additional sheets
    pub no_multiple_sheet: bool,

    /// Opaque metadata JSON
    pub metadata: String,

    /// Creation timestamp (RFC3339 string)
    pub created_at: String,

    /// Last update timestamp (RFC3339 string)
    pub updated_at: String,
}

impl GraphRow {
    /// Create a new graph row with a single default sheet
    pub fn new(key: String, name: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            key,
            name,
            description: None,
            workspace: String::new(),
            sheet_list: r#"{"0":"Main"}"#.to_string(),
            no_multiple_sheet: false,
            metadata: "{}".to_string(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Builder method to set the workspace
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// Parse the sheet list into an ordered map
    pub fn sheets(&self) -> StoreResult<BTreeMap<String, String>> {
        Ok(serde_json::from_str(&self.sheet_list)?)
    }

    /// Replace the sheet list from an ordered map
    pub fn set_sheets(&mut self, sheets: &BTreeMap<String, String>) -> StoreResult<()> {
        self.sheet_list = serde_json::to_string(sheets)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_graph_has_default_sheet() {
        let row = GraphRow::new("g1".to_string(), "Pipeline".to_string());
        let sheets = row.sheets().unwrap();
        assert_eq!(sheets.get("0").map(String::as_str), Some("Main"));
        assert!(!row.no_multiple_sheet);
    }

    #[test]
    fn test_sheet_list_round_trip() {
        let mut row = GraphRow::new("g1".to_string(), "Pipeline".to_string());
        let mut sheets = row.sheets().unwrap();
        sheets.insert("1".to_string(), "Detail".to_string());
        row.set_sheets(&sheets).unwrap();
        assert_eq!(row.sheets().unwrap().len(), 2);
    }
}

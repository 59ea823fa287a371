//! Snapshot diffing for the auto-save flusher
//!
//! diff = current − original, computed by JSON equality per entity. The
//! flusher turns the three sets into the minimum create/replace/remove
//! operations against the store, then replaces the snapshot.

use std::collections::HashMap;

use serde_json::Value;

use crate::session::doc;

/// Keys partitioned by what happened to them since the snapshot
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EntityDiff {
    /// In current, not in the snapshot
    pub created: Vec<String>,
    /// In both, but the document changed
    pub updated: Vec<String>,
    /// In the snapshot, not in current
    pub deleted: Vec<String>,
}

impl EntityDiff {
    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of store operations this diff implies
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// Diff one entity map against its snapshot
///
/// With `sheet_id` set, only entities on that sheet are considered (the
/// sheet of a deleted entity comes from its snapshot document).
pub fn diff_maps(
    current: &HashMap<String, Value>,
    original: &HashMap<String, Value>,
    sheet_id: Option<&str>,
) -> EntityDiff {
    let on_sheet = |document: &Value| match sheet_id {
        Some(sheet) => doc::doc_sheet(document) == Some(sheet),
        None => true,
    };

    let mut diff = EntityDiff::default();

    for (key, document) in current {
        if !on_sheet(document) {
            continue;
        }
        match original.get(key) {
            None => diff.created.push(key.clone()),
            Some(snapshot) if snapshot != document => diff.updated.push(key.clone()),
            Some(_) => {}
        }
    }

    for (key, snapshot) in original {
        if on_sheet(snapshot) && !current.contains_key(key) {
            diff.deleted.push(key.clone());
        }
    }

    diff.created.sort();
    diff.updated.sort();
    diff.deleted.sort();
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(key: &str, sheet: &str, x: i64) -> Value {
        json!({"key": key, "sheet": sheet, "position": {"x": x}})
    }

    fn map(entries: &[(&str, Value)]) -> HashMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_diff_identifies_all_three_sets() {
        let original = map(&[
            ("x", doc("x", "0", 1)),
            ("y", doc("y", "0", 2)),
            ("z", doc("z", "0", 3)),
        ]);
        let mut current = original.clone();
        current.remove("z");
        current.insert("w".to_string(), doc("w", "0", 9));
        current.insert("x".to_string(), doc("x", "0", 100));

        let diff = diff_maps(&current, &original, None);
        assert_eq!(diff.created, vec!["w".to_string()]);
        assert_eq!(diff.updated, vec!["x".to_string()]);
        assert_eq!(diff.deleted, vec!["z".to_string()]);
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn test_unchanged_maps_diff_empty() {
        let original = map(&[("x", doc("x", "0", 1))]);
        let diff = diff_maps(&original.clone(), &original, None);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_sheet_filter() {
        let original = map(&[("x", doc("x", "0", 1)), ("y", doc("y", "1", 2))]);
        let mut current = original.clone();
        current.insert("x".to_string(), doc("x", "0", 5));
        current.remove("y");

        let sheet0 = diff_maps(&current, &original, Some("0"));
        assert_eq!(sheet0.updated, vec!["x".to_string()]);
        assert!(sheet0.deleted.is_empty());

        let sheet1 = diff_maps(&current, &original, Some("1"));
        assert_eq!(sheet1.deleted, vec!["y".to_string()]);
        assert!(sheet1.updated.is_empty());
    }
}

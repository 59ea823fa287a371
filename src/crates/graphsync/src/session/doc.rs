//! Document envelope accessors
//!
//! Nodes, edges and node-config content live in memory as raw JSON
//! documents so the instruction engine can path-edit them freely. The
//! well-known envelope fields are read through these helpers; batch
//! creation validates the envelope shape before a document is admitted.

use serde_json::Value;

use crate::session::error::{SessionError, SessionResult};

/// Envelope fields instructions must not rewrite
pub const RESERVED_FIELDS: &[&str] = &["key", "graphKey", "sheet", "source", "target"];

/// localKey of a node or edge document
pub fn doc_key(doc: &Value) -> Option<&str> {
    doc.get("key").and_then(Value::as_str)
}

/// Owning graph of a document
pub fn doc_graph_key(doc: &Value) -> Option<&str> {
    doc.get("graphKey").and_then(Value::as_str)
}

/// Sheet partition of a document
pub fn doc_sheet(doc: &Value) -> Option<&str> {
    doc.get("sheet").and_then(Value::as_str)
}

/// Source node localKey of an edge document
pub fn edge_source(doc: &Value) -> Option<&str> {
    doc.get("source").and_then(Value::as_str)
}

/// Target node localKey of an edge document
pub fn edge_target(doc: &Value) -> Option<&str> {
    doc.get("target").and_then(Value::as_str)
}

/// Sub-workflow root marker on a node document
pub fn node_sub_graph_key(doc: &Value) -> Option<&str> {
    doc.get("subGraphKey").and_then(Value::as_str)
}

/// Validated node envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEnvelope {
    pub key: String,
    pub sheet: String,
}

/// Validated edge envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeEnvelope {
    pub key: String,
    pub sheet: String,
    pub source: String,
    pub target: String,
}

/// Check a new node document against the instance it is created in
pub fn validate_node_envelope(
    doc: &Value,
    graph_key: &str,
    sheet_id: &str,
) -> SessionResult<NodeEnvelope> {
    let key = doc_key(doc)
        .ok_or_else(|| SessionError::validation("node document missing string field 'key'"))?;
    match doc_graph_key(doc) {
        Some(gk) if gk == graph_key => {}
        _ => {
            return Err(SessionError::validation(format!(
                "node {} does not belong to graph {}",
                key, graph_key
            )))
        }
    }
    match doc_sheet(doc) {
        Some(sheet) if sheet == sheet_id => Ok(NodeEnvelope {
            key: key.to_string(),
            sheet: sheet.to_string(),
        }),
        _ => Err(SessionError::validation(format!(
            "node {} is not on sheet {}",
            key, sheet_id
        ))),
    }
}

/// Check a new edge document against the instance it is created in
pub fn validate_edge_envelope(
    doc: &Value,
    graph_key: &str,
    sheet_id: &str,
) -> SessionResult<EdgeEnvelope> {
    let key = doc_key(doc)
        .ok_or_else(|| SessionError::validation("edge document missing string field 'key'"))?;
    match doc_graph_key(doc) {
        Some(gk) if gk == graph_key => {}
        _ => {
            return Err(SessionError::validation(format!(
                "edge {} does not belong to graph {}",
                key, graph_key
            )))
        }
    }
    if doc_sheet(doc) != Some(sheet_id) {
        return Err(SessionError::validation(format!(
            "edge {} is not on sheet {}",
            key, sheet_id
        )));
    }
    let source = edge_source(doc)
        .ok_or_else(|| SessionError::validation(format!("edge {} missing 'source'", key)))?;
    let target = edge_target(doc)
        .ok_or_else(|| SessionError::validation(format!("edge {} missing 'target'", key)))?;
    Ok(EdgeEnvelope {
        key: key.to_string(),
        sheet: sheet_id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
    })
}

/// Whether an instruction path would rewrite a reserved envelope field
pub fn touches_reserved_field(path: &str) -> bool {
    let first = path.split('.').next().unwrap_or(path);
    RESERVED_FIELDS.contains(&first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_envelope_ok() {
        let doc = json!({"key": "n1", "graphKey": "g1", "sheet": "0", "type": "pump"});
        let env = validate_node_envelope(&doc, "g1", "0").unwrap();
        assert_eq!(env.key, "n1");
    }

    #[test]
    fn test_node_envelope_wrong_graph() {
        let doc = json!({"key": "n1", "graphKey": "other", "sheet": "0"});
        assert!(validate_node_envelope(&doc, "g1", "0").is_err());
    }

    #[test]
    fn test_node_envelope_wrong_sheet() {
        let doc = json!({"key": "n1", "graphKey": "g1", "sheet": "1"});
        assert!(validate_node_envelope(&doc, "g1", "0").is_err());
    }

    #[test]
    fn test_edge_envelope_requires_endpoints() {
        let doc = json!({"key": "e1", "graphKey": "g1", "sheet": "0", "source": "a"});
        assert!(validate_edge_envelope(&doc, "g1", "0").is_err());

        let doc = json!({"key": "e1", "graphKey": "g1", "sheet": "0", "source": "a", "target": "b"});
        let env = validate_edge_envelope(&doc, "g1", "0").unwrap();
        assert_eq!((env.source.as_str(), env.target.as_str()), ("a", "b"));
    }

    #[test]
    fn test_reserved_paths() {
        assert!(touches_reserved_field("key"));
        assert!(touches_reserved_field("source"));
        assert!(!touches_reserved_field("position.x"));
        assert!(!touches_reserved_field("data.key"));
    }
}

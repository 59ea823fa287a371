//! Base-36 identifier allocation
//!
//! Local keys for nodes, edges and embedded document elements are short
//! base-36 strings, unique for the lifetime of a graph: once a key has been
//! handed out it is never reused, even after the element is deleted. The
//! allocator tracks every key it has ever seen in a used-ID set and keeps a
//! counter strictly above the largest base-36-parseable key observed.

use std::collections::HashSet;

use serde_json::Value;

use crate::{ProtocolError, Result};

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Consecutive collisions tolerated before allocation gives up
const MAX_COLLISIONS: u32 = 10_000;

/// Object field that carries an embedded identifier
pub const IDENTIFIER_FIELD: &str = "identifier";

/// Encode a number as lowercase base-36
pub fn encode_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(ALPHABET[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    // alphabet bytes are ASCII
    String::from_utf8(out).unwrap_or_default()
}

/// Parse a lowercase base-36 string
///
/// Returns `None` for empty input, characters outside `[0-9a-z]`, or
/// values overflowing `u64`. Keys that fail to parse still occupy the
/// used-ID set; they just do not advance the counter.
pub fn parse_base36(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let mut n: u64 = 0;
    for c in s.bytes() {
        let digit = match c {
            b'0'..=b'9' => (c - b'0') as u64,
            b'a'..=b'z' => (c - b'a') as u64 + 10,
            _ => return None,
        };
        n = n.checked_mul(36)?.checked_add(digit)?;
    }
    Some(n)
}

/// Per-graph identifier allocator
///
/// Holds the monotonic counter and the used-ID set. The session layer
/// populates it at load time by scanning every localKey plus every
/// embedded `identifier` field, then allocates fresh keys from it for the
/// rest of the instance's life.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next: u64,
    used: HashSet<String>,
}

impl IdAllocator {
    /// Fresh allocator with an empty used set
    pub fn new() -> Self {
        Self {
            next: 1,
            used: HashSet::new(),
        }
    }

    /// Record an existing key
    ///
    /// The key enters the used set; if it parses as base-36 the counter is
    /// bumped past it.
    pub fn observe(&mut self, key: &str) {
        if let Some(n) = parse_base36(key) {
            self.next = self.next.max(n + 1);
        }
        self.used.insert(key.to_string());
    }

    /// Recursively record every embedded `identifier` field in a document
    pub fn observe_document(&mut self, doc: &Value) {
        match doc {
            Value::Object(map) => {
                if let Some(Value::String(id)) = map.get(IDENTIFIER_FIELD) {
                    self.observe(id);
                }
                for v in map.values() {
                    self.observe_document(v);
                }
            }
            Value::Array(items) => {
                for v in items {
                    self.observe_document(v);
                }
            }
            _ => {}
        }
    }

    /// Allocate a fresh key
    ///
    /// Fails with [`ProtocolError::IdSpaceExhausted`] after 10 000
    /// consecutive collisions with the used set.
    pub fn allocate(&mut self) -> Result<String> {
        for _ in 0..MAX_COLLISIONS {
            let candidate = encode_base36(self.next);
            self.next += 1;
            if self.used.insert(candidate.clone()) {
                return Ok(candidate);
            }
        }
        Err(ProtocolError::IdSpaceExhausted(MAX_COLLISIONS))
    }

    /// Whether a key has ever been assigned
    pub fn is_used(&self, key: &str) -> bool {
        self.used.contains(key)
    }

    /// Current counter value (next candidate)
    pub fn next_candidate(&self) -> u64 {
        self.next
    }

    /// Number of keys in the used set
    pub fn used_len(&self) -> usize {
        self.used.len()
    }
}

/// Recursively replace every embedded `identifier` field with a fresh key
///
/// Used when an instruction inserts a subtree and the client asked for
/// server-side identity (`applyUniqIdentifier`): client-side preview keys
/// are rewritten so the committed subtree carries graph-unique IDs.
pub fn assign_fresh_identifiers(doc: &mut Value, ids: &mut IdAllocator) -> Result<()> {
    match doc {
        Value::Object(map) => {
            if let Some(slot) = map.get_mut(IDENTIFIER_FIELD) {
                if slot.is_string() {
                    *slot = Value::String(ids.allocate()?);
                }
            }
            for v in map.values_mut() {
                assign_fresh_identifiers(v, ids)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for v in items {
                assign_fresh_identifiers(v, ids)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Dotted path to the sub-object whose `identifier` equals `id`
///
/// Depth-first; the empty string denotes the document root. The session
/// layer uses this to scope instructions to a targeted subtree.
pub fn find_identifier_path(doc: &Value, id: &str) -> Option<String> {
    fn search(value: &Value, id: &str, prefix: &mut Vec<String>) -> Option<String> {
        match value {
            Value::Object(map) => {
                if map.get(IDENTIFIER_FIELD).and_then(Value::as_str) == Some(id) {
                    return Some(prefix.join("."));
                }
                for (k, v) in map {
                    prefix.push(k.clone());
                    if let Some(found) = search(v, id, prefix) {
                        return Some(found);
                    }
                    prefix.pop();
                }
                None
            }
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    prefix.push(i.to_string());
                    if let Some(found) = search(v, id, prefix) {
                        return Some(found);
                    }
                    prefix.pop();
                }
                None
            }
            _ => None,
        }
    }
    search(doc, id, &mut Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base36_round_trip() {
        for n in [0u64, 1, 35, 36, 1295, 46655, 1_000_000] {
            assert_eq!(parse_base36(&encode_base36(n)), Some(n));
        }
        assert_eq!(encode_base36(35), "z");
        assert_eq!(encode_base36(36), "10");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert_eq!(parse_base36(""), None);
        assert_eq!(parse_base36("A1"), None);
        assert_eq!(parse_base36("a-b"), None);
    }

    #[test]
    fn test_allocator_skips_observed() {
        let mut ids = IdAllocator::new();
        ids.observe("5");
        assert_eq!(ids.next_candidate(), 6);
        let key = ids.allocate().unwrap();
        assert_eq!(key, "6");
        assert!(ids.is_used("5"));
        assert!(ids.is_used("6"));
    }

    #[test]
    fn test_deleted_keys_never_reallocated() {
        let mut ids = IdAllocator::new();
        ids.observe("b");
        // "b" stays used forever, even after the element is gone
        for _ in 0..100 {
            assert_ne!(ids.allocate().unwrap(), "b");
        }
    }

    #[test]
    fn test_non_base36_keys_occupy_used_set_only() {
        let mut ids = IdAllocator::new();
        ids.observe("node_legacy");
        assert_eq!(ids.next_candidate(), 1);
        assert!(ids.is_used("node_legacy"));
    }

    #[test]
    fn test_observe_document_recurses() {
        let mut ids = IdAllocator::new();
        let doc = json!({
            "identifier": "a",
            "children": [
                {"identifier": "b", "data": {"identifier": "c"}},
                {"plain": true}
            ]
        });
        ids.observe_document(&doc);
        assert!(ids.is_used("a"));
        assert!(ids.is_used("b"));
        assert!(ids.is_used("c"));
        // max observed is "c" = 12
        assert_eq!(ids.next_candidate(), 13);
    }

    #[test]
    fn test_assign_fresh_identifiers() {
        let mut ids = IdAllocator::new();
        ids.observe("z");
        let mut doc = json!({
            "identifier": "tmp-1",
            "children": [{"identifier": "tmp-2"}]
        });
        assign_fresh_identifiers(&mut doc, &mut ids).unwrap();
        let root = doc["identifier"].as_str().unwrap();
        let child = doc["children"][0]["identifier"].as_str().unwrap();
        assert_ne!(root, "tmp-1");
        assert_ne!(child, "tmp-2");
        assert_ne!(root, child);
        assert!(parse_base36(root).unwrap() > parse_base36("z").unwrap());
    }

    #[test]
    fn test_find_identifier_path() {
        let doc = json!({
            "identifier": "root",
            "content": {
                "blocks": [
                    {"identifier": "h1"},
                    {"identifier": "p2", "spans": [{"identifier": "s1"}]}
                ]
            }
        });
        assert_eq!(find_identifier_path(&doc, "root").as_deref(), Some(""));
        assert_eq!(
            find_identifier_path(&doc, "p2").as_deref(),
            Some("content.blocks.1")
        );
        assert_eq!(
            find_identifier_path(&doc, "s1").as_deref(),
            Some("content.blocks.1.spans.0")
        );
        assert_eq!(find_identifier_path(&doc, "ghost"), None);
    }
}

//! Inverse computation
//!
//! [`inverse`] is computed against the document *before* the edit is
//! applied. The collaboration layer records inverses ahead of application
//! so an undo entry exists even when a later instruction in the batch
//! aborts the commit.

use serde_json::Value;

use crate::instruction::EditOp;
use crate::path::Path;
use crate::{ProtocolError, Result};

/// Compute the instruction that undoes `op`
///
/// For every valid `(doc, op)`:
/// `apply(&apply(doc, op)?, &inverse(doc, op)?) == doc`.
/// Fails with the same error `apply` would produce when the edit cannot
/// land on `doc`.
pub fn inverse(doc: &Value, op: &EditOp) -> Result<EditOp> {
    let path = Path::parse(op.path())?;

    match op {
        EditOp::Set { path: raw, .. } => {
            let parent = lookup(doc, path.parent_segments())?;
            match current_slot(parent, &path)? {
                Some(old) => Ok(EditOp::Set {
                    path: raw.clone(),
                    value: old.clone(),
                }),
                // Key did not exist: the set was an insert
                None => Ok(EditOp::Delete { path: raw.clone() }),
            }
        }
        EditOp::Delete { path: raw } => {
            let parent = lookup(doc, path.parent_segments())?;
            let old = match parent {
                Value::Object(map) => map
                    .get(path.leaf())
                    .ok_or_else(|| ProtocolError::PathNotFound(path.to_string()))?,
                _ => {
                    return Err(ProtocolError::TypeMismatch {
                        path: path.to_string(),
                        expected: "object",
                    })
                }
            };
            Ok(EditOp::Set {
                path: raw.clone(),
                value: old.clone(),
            })
        }
        EditOp::InsertArray {
            path: raw, index, ..
        } => {
            let arr = lookup_array(doc, &path)?;
            if *index > arr.len() {
                return Err(ProtocolError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: *index,
                    len: arr.len(),
                });
            }
            Ok(EditOp::RemoveArray {
                path: raw.clone(),
                index: *index,
            })
        }
        EditOp::RemoveArray { path: raw, index } => {
            let arr = lookup_array(doc, &path)?;
            let old = arr.get(*index).ok_or(ProtocolError::IndexOutOfBounds {
                path: path.to_string(),
                index: *index,
                len: arr.len(),
            })?;
            Ok(EditOp::InsertArray {
                path: raw.clone(),
                index: *index,
                value: old.clone(),
            })
        }
        EditOp::MoveArray {
            path: raw,
            from,
            to,
        } => {
            let arr = lookup_array(doc, &path)?;
            let len = arr.len();
            let oob = |index: usize| ProtocolError::IndexOutOfBounds {
                path: path.to_string(),
                index,
                len,
            };
            if *from >= len {
                return Err(oob(*from));
            }
            if *to >= len {
                return Err(oob(*to));
            }
            Ok(EditOp::MoveArray {
                path: raw.clone(),
                from: *to,
                to: *from,
            })
        }
    }
}

/// Read-only descent, mirroring the traversal rules of apply
fn lookup<'a>(doc: &'a Value, segments: &[String]) -> Result<&'a Value> {
    let mut cursor = doc;
    for (depth, seg) in segments.iter().enumerate() {
        let prefix = || Path::join(&segments[..=depth]);
        cursor = match cursor {
            Value::Object(map) => map
                .get(seg)
                .ok_or_else(|| ProtocolError::PathNotFound(prefix()))?,
            Value::Array(items) => {
                let index = Path::as_index(seg).ok_or_else(|| ProtocolError::TypeMismatch {
                    path: prefix(),
                    expected: "array index",
                })?;
                items.get(index).ok_or_else(|| ProtocolError::IndexOutOfBounds {
                    path: prefix(),
                    index,
                    len: items.len(),
                })?
            }
            _ => {
                return Err(ProtocolError::TypeMismatch {
                    path: prefix(),
                    expected: "object or array",
                })
            }
        };
    }
    Ok(cursor)
}

fn lookup_array<'a>(doc: &'a Value, path: &Path) -> Result<&'a Vec<Value>> {
    lookup(doc, path.segments())?
        .as_array()
        .ok_or_else(|| ProtocolError::TypeMismatch {
            path: path.to_string(),
            expected: "array",
        })
}

/// The value currently occupying the leaf slot, if any
fn current_slot<'a>(parent: &'a Value, path: &Path) -> Result<Option<&'a Value>> {
    match parent {
        Value::Object(map) => Ok(map.get(path.leaf())),
        Value::Array(items) => {
            let index = Path::as_index(path.leaf()).ok_or(ProtocolError::TypeMismatch {
                path: path.to_string(),
                expected: "array index",
            })?;
            match items.get(index) {
                Some(v) => Ok(Some(v)),
                None => Err(ProtocolError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len: items.len(),
                }),
            }
        }
        _ => Err(ProtocolError::TypeMismatch {
            path: path.to_string(),
            expected: "object or array",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::apply;
    use serde_json::json;

    fn round_trip(doc: &Value, op: &EditOp) {
        let undo = inverse(doc, op).unwrap();
        let edited = apply(doc, op, None).unwrap();
        assert_eq!(&apply(&edited, &undo, None).unwrap(), doc);
    }

    #[test]
    fn test_inverse_set_existing() {
        let doc = json!({"position": {"x": 100}});
        let op = EditOp::Set {
            path: "position.x".to_string(),
            value: json!(500),
        };
        let undo = inverse(&doc, &op).unwrap();
        assert_eq!(
            undo,
            EditOp::Set {
                path: "position.x".to_string(),
                value: json!(100)
            }
        );
        round_trip(&doc, &op);
    }

    #[test]
    fn test_inverse_set_insert_is_delete() {
        let doc = json!({"data": {}});
        let op = EditOp::Set {
            path: "data.label".to_string(),
            value: json!("pump"),
        };
        let undo = inverse(&doc, &op).unwrap();
        assert_eq!(
            undo,
            EditOp::Delete {
                path: "data.label".to_string()
            }
        );
        round_trip(&doc, &op);
    }

    #[test]
    fn test_inverse_delete() {
        let doc = json!({"data": {"label": "pump"}});
        let op = EditOp::Delete {
            path: "data.label".to_string(),
        };
        round_trip(&doc, &op);
    }

    #[test]
    fn test_inverse_insert_remove() {
        let doc = json!({"rows": ["a", "b"]});
        round_trip(
            &doc,
            &EditOp::InsertArray {
                path: "rows".to_string(),
                index: 1,
                value: json!("x"),
            },
        );
        round_trip(
            &doc,
            &EditOp::RemoveArray {
                path: "rows".to_string(),
                index: 0,
            },
        );
    }

    #[test]
    fn test_inverse_move() {
        let doc = json!({"rows": ["a", "b", "c", "d"]});
        round_trip(
            &doc,
            &EditOp::MoveArray {
                path: "rows".to_string(),
                from: 3,
                to: 0,
            },
        );
    }

    #[test]
    fn test_inverse_fails_like_apply() {
        let doc = json!({"rows": ["a"]});
        let op = EditOp::RemoveArray {
            path: "rows".to_string(),
            index: 5,
        };
        assert!(inverse(&doc, &op).is_err());
        assert!(apply(&doc, &op, None).is_err());
    }
}

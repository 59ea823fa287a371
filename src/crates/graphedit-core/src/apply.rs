//! Instruction application
//!
//! [`apply`] returns a new document and never mutates its input, so a
//! caller can line up inverses against the pre-mutation state and discard
//! the result wholesale when a later instruction in a batch fails.

use serde_json::Value;

use crate::instruction::EditOp;
use crate::path::Path;
use crate::{ProtocolError, Result};

/// Apply-time guard
///
/// Called with every sub-value the path traverses (root first, dotted
/// prefix alongside). Returning `false` aborts the apply with
/// [`ProtocolError::GuardRejected`]; the session layer uses this to fence
/// instructions away from reserved document regions.
pub type Guard<'a> = &'a dyn Fn(&Value, &str) -> bool;

/// Apply a single instruction to a document
///
/// Returns the edited copy. The input document is untouched regardless of
/// the outcome.
pub fn apply(doc: &Value, op: &EditOp, guard: Option<Guard>) -> Result<Value> {
    let path = Path::parse(op.path())?;
    let mut out = doc.clone();

    check_guard(guard, &out, "")?;

    match op {
        EditOp::Set { value, .. } => {
            let parent = walk(&mut out, path.parent_segments(), guard)?;
            set_at(parent, &path, value.clone())?;
        }
        EditOp::Delete { .. } => {
            let parent = walk(&mut out, path.parent_segments(), guard)?;
            delete_at(parent, &path)?;
        }
        EditOp::InsertArray { index, value, .. } => {
            let arr = walk_to_array(&mut out, &path, guard)?;
            if *index > arr.len() {
                return Err(ProtocolError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: *index,
                    len: arr.len(),
                });
            }
            arr.insert(*index, value.clone());
        }
        EditOp::RemoveArray { index, .. } => {
            let arr = walk_to_array(&mut out, &path, guard)?;
            if *index >= arr.len() {
                return Err(ProtocolError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: *index,
                    len: arr.len(),
                });
            }
            arr.remove(*index);
        }
        EditOp::MoveArray { from, to, .. } => {
            let arr = walk_to_array(&mut out, &path, guard)?;
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
            let moved = arr.remove(*from);
            arr.insert(*to, moved);
        }
    }

    Ok(out)
}

fn check_guard(guard: Option<Guard<'_>>, value: &Value, prefix: &str) -> Result<()> {
    if let Some(guard) = guard {
        if !guard(value, prefix) {
            return Err(ProtocolError::GuardRejected(prefix.to_string()));
        }
    }
    Ok(())
}

/// Walk `segments` down from `doc`, guard-checking every value entered
fn walk<'a>(
    doc: &'a mut Value,
    segments: &[String],
    guard: Option<Guard<'_>>,
) -> Result<&'a mut Value> {
    let mut cursor = doc;
    for (depth, seg) in segments.iter().enumerate() {
        let prefix = Path::join(&segments[..=depth]);
        cursor = step(cursor, seg, &prefix)?;
        check_guard(guard, cursor, &prefix)?;
    }
    Ok(cursor)
}

fn walk_to_array<'a>(
    doc: &'a mut Value,
    path: &Path,
    guard: Option<Guard<'_>>,
) -> Result<&'a mut Vec<Value>> {
    let target = walk(doc, path.segments(), guard)?;
    target
        .as_array_mut()
        .ok_or_else(|| ProtocolError::TypeMismatch {
            path: path.to_string(),
            expected: "array",
        })
}

fn step<'a>(value: &'a mut Value, segment: &str, prefix: &str) -> Result<&'a mut Value> {
    match value {
        Value::Object(map) => map
            .get_mut(segment)
            .ok_or_else(|| ProtocolError::PathNotFound(prefix.to_string())),
        Value::Array(items) => {
            let len = items.len();
            let index = Path::as_index(segment).ok_or(ProtocolError::TypeMismatch {
                path: prefix.to_string(),
                expected: "array index",
            })?;
            items
                .get_mut(index)
                .ok_or(ProtocolError::IndexOutOfBounds {
                    path: prefix.to_string(),
                    index,
                    len,
                })
        }
        _ => Err(ProtocolError::TypeMismatch {
            path: prefix.to_string(),
            expected: "object or array",
        }),
    }
}

fn set_at(parent: &mut Value, path: &Path, value: Value) -> Result<()> {
    match parent {
        Value::Object(map) => {
            map.insert(path.leaf().to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let len = items.len();
            let index = Path::as_index(path.leaf()).ok_or(ProtocolError::TypeMismatch {
                path: path.to_string(),
                expected: "array index",
            })?;
            let slot = items
                .get_mut(index)
                .ok_or(ProtocolError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                    len,
                })?;
            *slot = value;
            Ok(())
        }
        _ => Err(ProtocolError::TypeMismatch {
            path: path.to_string(),
            expected: "object or array",
        }),
    }
}

fn delete_at(parent: &mut Value, path: &Path) -> Result<()> {
    match parent {
        Value::Object(map) => match map.remove(path.leaf()) {
            Some(_) => Ok(()),
            None => Err(ProtocolError::PathNotFound(path.to_string())),
        },
        // Array elements are removed with removeArray, never delete
        _ => Err(ProtocolError::TypeMismatch {
            path: path.to_string(),
            expected: "object",
        }),
    }
}

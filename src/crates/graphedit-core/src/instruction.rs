//! Instruction operators and validation
//!
//! The wire form is an internally tagged JSON object, e.g.
//! `{"op":"set","path":"position.x","value":500}` or
//! `{"op":"moveArray","path":"data.rows","from":1,"to":3}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::Path;
use crate::ProtocolError;

/// A single path-scoped edit to a JSON document
///
/// Every operator has a computable inverse (see [`crate::inverse`]), which
/// is what makes the undo/redo history of the collaboration layer possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum EditOp {
    /// Replace (or insert) the value at `path`
    Set { path: String, value: Value },

    /// Remove the object key at `path`
    Delete { path: String },

    /// Insert `value` at `index` into the array at `path`
    #[serde(rename_all = "camelCase")]
    InsertArray {
        path: String,
        index: usize,
        value: Value,
    },

    /// Remove the element at `index` from the array at `path`
    #[serde(rename_all = "camelCase")]
    RemoveArray { path: String, index: usize },

    /// Move the element at `from` to position `to` within the array at `path`
    #[serde(rename_all = "camelCase")]
    MoveArray { path: String, from: usize, to: usize },
}

impl EditOp {
    /// The raw path this operation targets
    pub fn path(&self) -> &str {
        match self {
            EditOp::Set { path, .. }
            | EditOp::Delete { path }
            | EditOp::InsertArray { path, .. }
            | EditOp::RemoveArray { path, .. }
            | EditOp::MoveArray { path, .. } => path,
        }
    }

    /// Operator name as it appears on the wire
    pub fn op_name(&self) -> &'static str {
        match self {
            EditOp::Set { .. } => "set",
            EditOp::Delete { .. } => "delete",
            EditOp::InsertArray { .. } => "insertArray",
            EditOp::RemoveArray { .. } => "removeArray",
            EditOp::MoveArray { .. } => "moveArray",
        }
    }
}

/// Schema-check an instruction
///
/// Total and cheap: parses the path, no document access, no I/O. A
/// validated instruction can still fail to apply (missing target, index out
/// of bounds); validation only rules out structurally malformed input.
pub fn validate(op: &EditOp) -> Result<(), ProtocolError> {
    Path::parse(op.path())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_set() {
        let op = EditOp::Set {
            path: "position.x".to_string(),
            value: json!(500),
        };
        let wire = serde_json::to_value(&op).unwrap();
        assert_eq!(wire, json!({"op": "set", "path": "position.x", "value": 500}));
    }

    #[test]
    fn test_wire_shape_move_array() {
        let wire = json!({"op": "moveArray", "path": "data.rows", "from": 1, "to": 3});
        let op: EditOp = serde_json::from_value(wire).unwrap();
        assert_eq!(
            op,
            EditOp::MoveArray {
                path: "data.rows".to_string(),
                from: 1,
                to: 3
            }
        );
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let op = EditOp::Delete {
            path: "data.config.title".to_string(),
        };
        assert!(validate(&op).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_path() {
        let op = EditOp::Set {
            path: String::new(),
            value: json!(null),
        };
        assert!(matches!(
            validate(&op),
            Err(ProtocolError::InvalidPath(_))
        ));

        let op = EditOp::RemoveArray {
            path: "a..b".to_string(),
            index: 0,
        };
        assert!(validate(&op).is_err());
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let wire = json!({"op": "swap", "path": "a"});
        assert!(serde_json::from_value::<EditOp>(wire).is_err());
    }
}

//! # graphedit-core - Invertible Edit Instructions for JSON Documents
//!
//! Pure, side-effect-free edit protocol shared between the collaboration
//! server and its clients. An [`EditOp`] is a path-scoped, invertible edit
//! to a JSON document (a graph node, an edge, or a node-config content
//! tree):
//!
//! - [`validate`] checks an instruction without touching any document.
//! - [`apply`] produces a **new** document; the input is never mutated.
//! - [`inverse`] computes the instruction that undoes an edit, from the
//!   pre-mutation document.
//!
//! The round-trip law holds for every valid `(doc, op)` pair:
//!
//! ```text
//! apply(apply(doc, op), inverse(doc, op)) == doc
//! ```
//!
//! The [`ident`] module provides the base-36 identifier allocator used to
//! hand out graph-unique local keys, including the recursive scan and
//! rewrite of `identifier` fields embedded in document subtrees.
//!
//! ```rust
//! use graphedit_core::{apply, inverse, EditOp};
//! use serde_json::json;
//!
//! let doc = json!({"position": {"x": 100, "y": 40}});
//! let op = EditOp::Set { path: "position.x".into(), value: json!(500) };
//!
//! let edited = apply(&doc, &op, None).unwrap();
//! assert_eq!(edited["position"]["x"], 500);
//!
//! let undo = inverse(&doc, &op).unwrap();
//! assert_eq!(apply(&edited, &undo, None).unwrap(), doc);
//! ```

use thiserror::Error;

pub mod apply;
pub mod ident;
pub mod instruction;
pub mod inverse;
pub mod path;

pub use apply::{apply, Guard};
pub use ident::{
    assign_fresh_identifiers, encode_base36, find_identifier_path, parse_base36, IdAllocator,
};
pub use instruction::{validate, EditOp};
pub use inverse::inverse;
pub use path::Path;

/// Errors produced by the instruction engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Instruction path is empty or contains an empty segment
    #[error("Invalid instruction path: {0}")]
    InvalidPath(String),

    /// Path does not resolve inside the document
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Array operation index is outside the array bounds
    #[error("Index {index} out of bounds at {path} (len {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    /// Operation does not match the value kind at the path
    #[error("Type mismatch at {path}: expected {expected}")]
    TypeMismatch { path: String, expected: &'static str },

    /// Apply guard rejected a sub-object on the path
    #[error("Guard rejected path: {0}")]
    GuardRejected(String),

    /// Identifier allocation gave up after too many collisions
    #[error("Identifier space exhausted after {0} consecutive collisions")]
    IdSpaceExhausted(u32),
}

/// Result type for instruction engine operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

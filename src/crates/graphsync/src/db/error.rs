//! Store error types
//!
//! Error propagation and conversion from sqlx for the store adapter.

use thiserror::Error;

/// Store adapter error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Document (de)serialization failed
    #[error("Document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Create a new NotFound error with context
    pub fn not_found(context: impl Into<String>) -> Self {
        StoreError::NotFound(context.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_helper() {
        let err = StoreError::not_found("graph g1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Record not found: graph g1");
    }

    #[test]
    fn test_serde_conversion() {
        let bad: Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: StoreError = bad.unwrap_err().into();
        assert!(!err.is_not_found());
    }
}

//! Per-instance user entries

use uuid::Uuid;

/// One user registration on an instance
///
/// A user registers per sheet; the same userId may hold several entries
/// when editing multiple sheets at once, which is why fan-out deduplicates
/// by userId.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    /// Connection the registration arrived on
    pub conn_id: Uuid,
    /// Stable user identity
    pub user_id: String,
    /// Display name shown to collaborators
    pub user_name: String,
    /// Sheet the user registered on
    pub sheet_id: String,
}

impl SessionUser {
    /// Create a registration entry
    pub fn new(conn_id: Uuid, user_id: &str, user_name: &str, sheet_id: &str) -> Self {
        Self {
            conn_id,
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            sheet_id: sheet_id.to_string(),
        }
    }
}

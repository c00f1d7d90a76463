//! User identity types.

use serde::{Deserialize, Serialize};

use crate::{Timestamp, UserId, now};

/// A user record. Username uniqueness is enforced at the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    /// Create a new user with a fresh id.
    pub fn new(username: impl Into<String>) -> Self {
        let now = now();
        Self {
            id: UserId::new(),
            username: username.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

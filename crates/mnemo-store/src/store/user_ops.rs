//! User CRUD operations.

use chrono::{DateTime, Utc};
use rusqlite::params;
use tracing::debug;

use mnemo_types::{User, UserId};

use crate::error::{Result, StoreError};
use crate::validation::validate_username;

use super::ConversationStore;

impl ConversationStore {
    /// Create and persist a new user.
    ///
    /// A duplicate username surfaces as a uniqueness violation
    /// (`StoreError::is_unique_violation`).
    pub fn create_user(&self, username: &str) -> Result<User> {
        validate_username(username)?;
        let user = User::new(username);
        self.insert_user(&user)?;
        Ok(user)
    }

    /// Insert an existing user record.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        validate_username(&user.username)?;
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO users (id, username, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                user.id.to_string(),
                user.username,
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        )?;

        debug!("Inserted user {} ({})", user.id, user.username);
        Ok(())
    }

    /// Get a user by ID.
    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, username, created_at, updated_at FROM users WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_user(row)?))
        } else {
            Ok(None)
        }
    }

    /// Get a user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, username, created_at, updated_at FROM users WHERE username = ?1",
        )?;
        let mut rows = stmt.query(params![username])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_user(row)?))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn row_to_user(row: &rusqlite::Row) -> Result<User> {
        let id_str: String = row.get(0)?;
        let username: String = row.get(1)?;
        let created_at_str: String = row.get(2)?;
        let updated_at_str: String = row.get(3)?;

        Ok(User {
            id: UserId::parse(&id_str)?,
            username,
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }
}

/// Parse an RFC 3339 timestamp column.
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| StoreError::InvalidData(e.to_string()))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> ConversationStore {
        ConversationStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_create_and_get_user() {
        let store = create_test_store();

        let user = store.create_user("alice").unwrap();

        let by_id = store.get_user(user.id).unwrap().unwrap();
        assert_eq!(by_id.username, "alice");

        let by_name = store.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);

        assert!(store.get_user_by_username("nobody").unwrap().is_none());
        assert!(store.get_user(UserId::new()).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_is_unique_violation() {
        let store = create_test_store();

        store.create_user("alice").unwrap();
        let err = store.create_user("alice").unwrap_err();
        assert!(err.is_unique_violation());

        // Distinct usernames still succeed.
        store.create_user("bob").unwrap();
    }

    #[test]
    fn test_invalid_username_rejected() {
        let store = create_test_store();
        assert!(store.create_user("").is_err());
        assert!(store.create_user("has space").is_err());
    }
}

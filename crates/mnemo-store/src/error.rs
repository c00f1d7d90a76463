//! Error types for the store crate.

use thiserror::Error;

/// Errors that can occur in the store crate.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Requested resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A DDL statement hit an object that already exists, i.e. a migration
    /// unit was re-applied without ledger protection.
    #[error("Duplicate object: {0}")]
    DuplicateObject(String),

    /// Invalid UUID format.
    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    /// Invalid data or state.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Which constraint a rejected write violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Uniqueness or primary key violation.
    Unique,
    /// Referential-integrity violation.
    ForeignKey,
    /// CHECK constraint violation.
    Check,
    /// NOT NULL violation.
    NotNull,
    /// Some other constraint.
    Other,
}

impl StoreError {
    /// Classify a constraint violation, if this error is one.
    ///
    /// Distinguishes the rejected-write taxonomy (uniqueness, referential
    /// integrity, check) from everything else; connectivity and I/O errors
    /// return `None` and are the caller's to retry.
    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        use rusqlite::ffi;

        let StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) = self else {
            return None;
        };
        if e.code != rusqlite::ErrorCode::ConstraintViolation {
            return None;
        }
        Some(match e.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                ConstraintKind::Unique
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
            ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
            ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
            _ => ConstraintKind::Other,
        })
    }

    /// True if this is a uniqueness violation (e.g. duplicate username).
    pub fn is_unique_violation(&self) -> bool {
        self.constraint_kind() == Some(ConstraintKind::Unique)
    }

    /// True if this is a referential-integrity violation.
    pub fn is_foreign_key_violation(&self) -> bool {
        self.constraint_kind() == Some(ConstraintKind::ForeignKey)
    }

    /// True if this is a CHECK constraint violation.
    pub fn is_check_violation(&self) -> bool {
        self.constraint_kind() == Some(ConstraintKind::Check)
    }

    /// Classify a DDL failure, mapping "already exists" onto
    /// [`StoreError::DuplicateObject`].
    ///
    /// SQLite reports a re-created index or table as a generic error whose
    /// message names the object; surfacing it as its own variant keeps
    /// re-application failures distinguishable from broken SQL.
    pub(crate) fn from_ddl(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(_, Some(msg)) = &err
            && msg.contains("already exists")
        {
            return StoreError::DuplicateObject(msg.clone());
        }
        StoreError::Database(err)
    }
}

//! Validation at the write boundary.
//!
//! The schema keeps text columns permissive; these checks run before any
//! row is written so typos never reach storage.

use crate::error::{Result, StoreError};

/// Specific validation error types for store data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty.
    #[error("content is empty")]
    EmptyContent,

    /// Username is empty.
    #[error("username is empty")]
    EmptyUsername,

    /// Username contains whitespace or control characters.
    #[error("username {0:?} contains invalid characters")]
    InvalidUsername(String),

    /// Embedding dimension mismatch.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Embedding contains invalid values (NaN or Inf).
    #[error("embedding contains {count} invalid values (NaN or Inf)")]
    InvalidEmbeddingValues {
        /// Number of invalid values found.
        count: usize,
    },
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        StoreError::InvalidData(err.to_string())
    }
}

/// Validate an embedding vector: dimension match, no NaN or Inf values.
pub fn validate_embedding(
    embedding: &[f32],
    expected_dim: usize,
) -> std::result::Result<(), ValidationError> {
    if embedding.len() != expected_dim {
        return Err(ValidationError::DimensionMismatch {
            expected: expected_dim,
            actual: embedding.len(),
        });
    }

    let invalid_count = embedding
        .iter()
        .filter(|v| v.is_nan() || v.is_infinite())
        .count();
    if invalid_count > 0 {
        return Err(ValidationError::InvalidEmbeddingValues {
            count: invalid_count,
        });
    }

    Ok(())
}

/// Convenience wrapper converting to [`StoreError`].
pub fn validate_embedding_result(embedding: &[f32], expected_dim: usize) -> Result<()> {
    validate_embedding(embedding, expected_dim).map_err(StoreError::from)
}

/// Validate a username: non-empty, no whitespace or control characters.
pub fn validate_username(username: &str) -> std::result::Result<(), ValidationError> {
    if username.is_empty() {
        return Err(ValidationError::EmptyUsername);
    }
    if username
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(ValidationError::InvalidUsername(username.to_string()));
    }
    Ok(())
}

/// Validate message or memory content: non-empty, no null bytes.
pub fn validate_content(content: &str) -> std::result::Result<(), ValidationError> {
    if content.is_empty() || content.contains('\0') {
        return Err(ValidationError::EmptyContent);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(&[0.1, 0.2], 2).is_ok());
        assert!(matches!(
            validate_embedding(&[0.1], 2),
            Err(ValidationError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            validate_embedding(&[f32::NAN, 0.0], 2),
            Err(ValidationError::InvalidEmbeddingValues { count: 1 })
        ));
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("a b").is_err());
        assert!(validate_username("a\tb").is_err());
    }

    #[test]
    fn test_validate_content() {
        assert!(validate_content("hello").is_ok());
        assert!(validate_content("").is_err());
        assert!(validate_content("a\0b").is_err());
    }
}

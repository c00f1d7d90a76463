//! Shared domain types for the mnemo conversation and memory store.
//!
//! These types form the application boundary over a deliberately permissive
//! storage layer: the database keeps `status`, `role`, and `memory_type` as
//! plain text, while every read and write in Rust goes through the closed
//! enums defined here.

pub mod conversation;
pub mod ids;
pub mod memory;
pub mod message;
pub mod user;

pub use conversation::{Conversation, ConversationStatus};
pub use ids::{ConversationId, MemoryEntryId, MessageId, UserId};
pub use memory::{AuditAction, AuditRecord, MemoryEntry, MemoryType};
pub use message::{DEFAULT_MODEL_ID, Message, Role};
pub use user::User;

/// Timestamp type used across all entities (UTC, stored as RFC 3339 text).
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Current UTC time.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

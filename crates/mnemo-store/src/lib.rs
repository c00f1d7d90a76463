//! Conversation and memory storage for mnemo.
//!
//! This crate persists chatbot state in a single SQLite file: users,
//! conversations, messages, and long-lived memory entries, each carrying a
//! 1536-dimension embedding for semantic recall. Schema changes flow through
//! a forward-only migration sequencer backed by a ledger table, and
//! sqlite-vec indexes can be added or dropped at any time as a pure
//! performance knob.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ConversationStore                                                      │
//! │  - Single SQLite file with WAL mode, foreign_keys=ON                    │
//! │  - users, conversations, messages (cascade delete), memory_entries      │
//! │  - memory_audit_log: append-only trail for memory transitions           │
//! │  - schema_migrations: forward-only versioned ledger with checksums      │
//! │  - Optional vec0 indexes over each embedding column                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use mnemo_store::ConversationStore;
//! use mnemo_types::{Message, MemoryType, Role};
//!
//! // Open or create a store; migrations run automatically.
//! let store = ConversationStore::open("~/.mnemo/mnemo.db")?;
//!
//! let user = store.create_user("alice")?;
//! let conversation = store.create_conversation(user.id)?;
//!
//! let embedding = vec![0.0; store.embedding_dimensions()];
//! store.insert_message(&Message::new(
//!     conversation.id,
//!     Role::User,
//!     "What did we decide about the schema?",
//!     embedding.clone(),
//! ))?;
//!
//! // Long-lived memory with an audited lifecycle.
//! let entry = store.create_memory_entry(
//!     user.id,
//!     MemoryType::Recall,
//!     "Prefers forward-only migrations",
//!     embedding,
//! )?;
//! store.evict_memory(entry.id, serde_json::json!({"reason": "superseded"}))?;
//! # Ok::<(), mnemo_store::StoreError>(())
//! ```

pub mod error;
pub mod migrate;
pub mod store;
pub mod validation;
pub mod vector;

// Re-export error types
pub use error::{ConstraintKind, Result, StoreError};

// Re-export store
pub use store::{ConversationStore, StoreStats};

// Re-export migration sequencer
pub use migrate::{AppliedMigration, LATEST_VERSION, MigrationUnit, Migrator, UNITS, find_unit};

// Re-export vector search
pub use vector::{
    DEFAULT_EMBEDDING_DIMS, EmbeddingColumn, SimilarityResult, blob_to_embedding,
    check_vector_extension, create_index, drop_index, embedding_to_blob, has_index,
    init_vector_extension, l2_distance, rebuild_index, search_among,
};

// Re-export validation
pub use validation::{
    ValidationError, validate_content, validate_embedding, validate_embedding_result,
    validate_username,
};

//! Memory entry and audit trail types.

use serde::{Deserialize, Serialize};

use crate::{MemoryEntryId, Timestamp, UserId, now};

/// A long-lived, typed, evictable memory record for a user.
///
/// Lifecycle: an entry starts active and may be evicted exactly once.
/// `is_active` and `evicted_at` are kept consistent by the store's
/// transition methods; an evicted entry never returns to the active set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryEntryId,
    pub user_id: UserId,
    pub memory_type: MemoryType,
    pub content: String,
    pub meta_info: serde_json::Value,
    pub embedding: Vec<f32>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evicted_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl MemoryEntry {
    /// Create a new active memory entry.
    pub fn new(
        user_id: UserId,
        memory_type: MemoryType,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: MemoryEntryId::new(),
            user_id,
            memory_type,
            content: content.into(),
            meta_info: serde_json::Value::Object(serde_json::Map::new()),
            embedding,
            is_active: true,
            evicted_at: None,
            created_at: now(),
        }
    }

    /// Attach structured metadata.
    pub fn with_meta(mut self, meta_info: serde_json::Value) -> Self {
        self.meta_info = meta_info;
        self
    }
}

/// Kind of memory block an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Persona,
    UserProfile,
    Recall,
    Summary,
    Archival,
    System,
}

impl MemoryType {
    /// Database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persona => "persona",
            Self::UserProfile => "user_profile",
            Self::Recall => "recall",
            Self::Summary => "summary",
            Self::Archival => "archival",
            Self::System => "system",
        }
    }

    /// Parse from the database/wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "persona" => Some(Self::Persona),
            "user_profile" => Some(Self::UserProfile),
            "recall" => Some(Self::Recall),
            "summary" => Some(Self::Summary),
            "archival" => Some(Self::Archival),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Lifecycle action recorded in the audit trail.
///
/// The storage layer additionally enforces this set with a CHECK
/// constraint, since the audit log is the sole record of why an entry
/// left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Evicted,
    Summarized,
    Updated,
}

impl AuditAction {
    /// Database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evicted => "evicted",
            Self::Summarized => "summarized",
            Self::Updated => "updated",
        }
    }

    /// Parse from the database/wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "evicted" => Some(Self::Evicted),
            "summarized" => Some(Self::Summarized),
            "updated" => Some(Self::Updated),
            _ => None,
        }
    }
}

/// One append-only audit trail row for a memory entry transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic log id assigned by the store.
    pub log_id: i64,
    pub entry_id: MemoryEntryId,
    pub action: AuditAction,
    pub detail: serde_json::Value,
    pub action_time: Timestamp,
}

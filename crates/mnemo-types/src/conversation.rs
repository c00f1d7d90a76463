//! Conversation types.

use serde::{Deserialize, Serialize};

use crate::{ConversationId, Timestamp, UserId, now};

/// A conversation owned by a user.
///
/// Carries a rolling summary of the exchange plus an embedding of that
/// summary for semantic retrieval across conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_embedding: Option<Vec<f32>>,
    pub status: ConversationStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Conversation {
    /// Create a new active conversation for a user.
    pub fn new(user_id: UserId) -> Self {
        let now = now();
        Self {
            id: ConversationId::new(),
            user_id,
            title: Some("New Conversation".to_string()),
            summary: None,
            summary_embedding: None,
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Status of a conversation.
///
/// Stored as plain text; unknown values read back from the database are a
/// data error at this boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    /// Database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    /// Parse from the database/wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

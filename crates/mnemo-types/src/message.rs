//! Message types.

use serde::{Deserialize, Serialize};

use crate::{ConversationId, MessageId, Timestamp, UserId, now};

/// Model recorded on messages when the caller does not name one.
pub const DEFAULT_MODEL_ID: &str = "gemini-2.0-flash";

/// A message within a conversation.
///
/// `parent_message_id` forms a reply tree within the conversation.
/// `sender_id` is set for user-authored messages and absent for generated
/// ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    pub role: Role,
    pub model_id: String,
    pub message: String,
    pub message_embedding: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<MessageId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Message {
    /// Create a new message in a conversation.
    pub fn new(
        conversation_id: ConversationId,
        role: Role,
        message: impl Into<String>,
        message_embedding: Vec<f32>,
    ) -> Self {
        let now = now();
        Self {
            id: MessageId::new(),
            conversation_id,
            sender_id: None,
            role,
            model_id: DEFAULT_MODEL_ID.to_string(),
            message: message.into(),
            message_embedding,
            parent_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the sending user.
    pub fn with_sender(mut self, sender_id: UserId) -> Self {
        self.sender_id = Some(sender_id);
        self
    }

    /// Reply to an existing message.
    pub fn with_parent(mut self, parent_message_id: MessageId) -> Self {
        self.parent_message_id = Some(parent_message_id);
        self
    }

    /// Record the model that produced this message.
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }
}

/// Conversational role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    /// Database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    /// Parse from the database/wire representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

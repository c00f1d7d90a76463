//! Message CRUD, thread walking, and similarity search.

use rusqlite::params;
use tracing::debug;

use mnemo_types::{ConversationId, Message, MessageId, Role, UserId};

use crate::error::{Result, StoreError};
use crate::validation::{validate_content, validate_embedding_result};
use crate::vector::{self, EmbeddingColumn};

use super::ConversationStore;
use super::user_ops::parse_timestamp;

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, role, model_id, message, \
     message_embedding, parent_message_id, created_at, updated_at";

impl ConversationStore {
    /// Insert a new message.
    ///
    /// A dangling `conversation_id`, `sender_id`, or `parent_message_id`
    /// surfaces as a referential-integrity violation
    /// (`StoreError::is_foreign_key_violation`).
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        validate_content(&message.message)?;
        validate_embedding_result(&message.message_embedding, self.embedding_dimensions())?;
        let conn = self.conn.lock().unwrap();

        conn.execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender_id.map(|id| id.to_string()),
                message.role.as_str(),
                message.model_id,
                message.message,
                vector::embedding_to_blob(&message.message_embedding),
                message.parent_message_id.map(|id| id.to_string()),
                message.created_at.to_rfc3339(),
                message.updated_at.to_rfc3339(),
            ],
        )?;

        vector::upsert_index_entry(
            &conn,
            EmbeddingColumn::Message,
            &message.id.to_string(),
            &message.message_embedding,
        )?;

        debug!(
            "Inserted message {} in conversation {}",
            message.id, message.conversation_id
        );
        Ok(())
    }

    /// Get a message by ID.
    pub fn get_message(&self, id: MessageId) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
        ))?;
        let mut rows = stmt.query(params![id.to_string()])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_message(row)?))
        } else {
            Ok(None)
        }
    }

    /// List a conversation's messages in creation order.
    pub fn list_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 ORDER BY created_at"
        ))?;
        let mut rows = stmt.query(params![conversation_id.to_string()])?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(Self::row_to_message(row)?);
        }
        Ok(messages)
    }

    /// Number of messages in a conversation.
    pub fn count_messages(&self, conversation_id: ConversationId) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Walk a message's reply chain back to the thread root.
    ///
    /// Returns the chain root-first, ending with the requested message.
    pub fn message_thread(&self, id: MessageId) -> Result<Vec<Message>> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);

        while let Some(current) = cursor {
            let message = self
                .get_message(current)?
                .ok_or_else(|| StoreError::NotFound(format!("Message {current}")))?;
            cursor = message.parent_message_id;
            chain.push(message);

            // A parent cycle would be a data corruption; stop rather than spin.
            if chain.len() > 10_000 {
                return Err(StoreError::InvalidData(format!(
                    "reply chain for message {id} exceeds 10000 links"
                )));
            }
        }

        chain.reverse();
        Ok(chain)
    }

    /// Top-k messages in a conversation by embedding similarity.
    pub fn search_messages(
        &self,
        conversation_id: ConversationId,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(Message, f32)>> {
        validate_embedding_result(query_embedding, self.embedding_dimensions())?;
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare("SELECT id FROM messages WHERE conversation_id = ?1")?;
        let candidates: Vec<String> = stmt
            .query_map(params![conversation_id.to_string()], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let ranked = vector::search_among(
            &conn,
            EmbeddingColumn::Message,
            query_embedding,
            &candidates,
            limit,
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
        ))?;
        let mut results = Vec::with_capacity(ranked.len());
        for hit in ranked {
            let mut rows = stmt.query(params![hit.id])?;
            if let Some(row) = rows.next()? {
                results.push((Self::row_to_message(row)?, hit.distance));
            }
        }
        Ok(results)
    }

    pub(crate) fn row_to_message(row: &rusqlite::Row) -> Result<Message> {
        let id_str: String = row.get(0)?;
        let conversation_id_str: String = row.get(1)?;
        let sender_id_str: Option<String> = row.get(2)?;
        let role_str: String = row.get(3)?;
        let model_id: String = row.get(4)?;
        let message: String = row.get(5)?;
        let embedding_blob: Vec<u8> = row.get(6)?;
        let parent_id_str: Option<String> = row.get(7)?;
        let created_at_str: String = row.get(8)?;
        let updated_at_str: String = row.get(9)?;

        let role = Role::parse(&role_str)
            .ok_or_else(|| StoreError::InvalidData(format!("Unknown role: {role_str}")))?;

        Ok(Message {
            id: MessageId::parse(&id_str)?,
            conversation_id: ConversationId::parse(&conversation_id_str)?,
            sender_id: sender_id_str.as_deref().map(UserId::parse).transpose()?,
            role,
            model_id,
            message,
            message_embedding: vector::blob_to_embedding(&embedding_blob)?,
            parent_message_id: parent_id_str.as_deref().map(MessageId::parse).transpose()?,
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }
}

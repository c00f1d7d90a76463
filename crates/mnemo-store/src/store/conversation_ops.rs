//! Conversation CRUD and summary operations.

use chrono::Utc;
use rusqlite::params;
use tracing::debug;

use mnemo_types::{Conversation, ConversationId, ConversationStatus, UserId};

use crate::error::{Result, StoreError};
use crate::validation::validate_embedding_result;
use crate::vector::{self, EmbeddingColumn};

use super::ConversationStore;
use super::user_ops::parse_timestamp;

impl ConversationStore {
    /// Create and persist a new active conversation for a user.
    pub fn create_conversation(&self, user_id: UserId) -> Result<Conversation> {
        let conversation = Conversation::new(user_id);
        self.insert_conversation(&conversation)?;
        Ok(conversation)
    }

    /// Insert an existing conversation record.
    pub fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        if let Some(embedding) = &conversation.summary_embedding {
            validate_embedding_result(embedding, self.embedding_dimensions())?;
        }
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO conversations (id, user_id, title, summary, summary_embedding, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                conversation.id.to_string(),
                conversation.user_id.to_string(),
                conversation.title,
                conversation.summary,
                conversation
                    .summary_embedding
                    .as_deref()
                    .map(vector::embedding_to_blob),
                conversation.status.as_str(),
                conversation.created_at.to_rfc3339(),
                conversation.updated_at.to_rfc3339(),
            ],
        )?;

        if let Some(embedding) = &conversation.summary_embedding {
            vector::upsert_index_entry(
                &conn,
                EmbeddingColumn::ConversationSummary,
                &conversation.id.to_string(),
                embedding,
            )?;
        }

        debug!("Inserted conversation {}", conversation.id);
        Ok(())
    }

    /// Get a conversation by ID.
    pub fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, title, summary, summary_embedding, status, created_at, updated_at
            FROM conversations
            WHERE id = ?1
            "#,
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_conversation(row)?))
        } else {
            Ok(None)
        }
    }

    /// List a user's conversations, most recently updated first.
    pub fn list_conversations_by_user(&self, user_id: UserId) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, title, summary, summary_embedding, status, created_at, updated_at
            FROM conversations
            WHERE user_id = ?1
            ORDER BY updated_at DESC
            "#,
        )?;
        let mut rows = stmt.query(params![user_id.to_string()])?;

        let mut conversations = Vec::new();
        while let Some(row) = rows.next()? {
            conversations.push(Self::row_to_conversation(row)?);
        }
        Ok(conversations)
    }

    /// Replace a conversation's rolling summary and its embedding.
    pub fn update_conversation_summary(
        &self,
        id: ConversationId,
        summary: &str,
        summary_embedding: &[f32],
    ) -> Result<()> {
        validate_embedding_result(summary_embedding, self.embedding_dimensions())?;
        let conn = self.conn.lock().unwrap();

        let rows_affected = conn.execute(
            r#"
            UPDATE conversations
            SET summary = ?2, summary_embedding = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
            params![
                id.to_string(),
                summary,
                vector::embedding_to_blob(summary_embedding),
                Utc::now().to_rfc3339(),
            ],
        )?;
        if rows_affected == 0 {
            return Err(StoreError::NotFound(format!("Conversation {id}")));
        }

        vector::upsert_index_entry(
            &conn,
            EmbeddingColumn::ConversationSummary,
            &id.to_string(),
            summary_embedding,
        )?;

        debug!("Updated summary for conversation {}", id);
        Ok(())
    }

    /// Set a conversation's status.
    pub fn set_conversation_status(
        &self,
        id: ConversationId,
        status: ConversationStatus,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let rows_affected = conn.execute(
            "UPDATE conversations SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), status.as_str(), Utc::now().to_rfc3339()],
        )?;
        if rows_affected == 0 {
            return Err(StoreError::NotFound(format!("Conversation {id}")));
        }
        Ok(())
    }

    /// Delete a conversation. Its messages cascade away in the same
    /// transaction as the index cleanup; no reader sees one without the
    /// other, and a failure leaves both base tables and indexes untouched.
    pub fn delete_conversation(&self, id: ConversationId) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        // Clear index entries for the doomed messages; the base rows go
        // with the cascade.
        if vector::has_index(&tx, EmbeddingColumn::Message)? {
            let ids: Vec<String> = {
                let mut stmt =
                    tx.prepare("SELECT id FROM messages WHERE conversation_id = ?1")?;
                stmt.query_map(params![id.to_string()], |row| row.get(0))?
                    .collect::<std::result::Result<_, _>>()?
            };
            vector::remove_index_entries(&tx, EmbeddingColumn::Message, &ids)?;
        }
        vector::remove_index_entries(
            &tx,
            EmbeddingColumn::ConversationSummary,
            &[id.to_string()],
        )?;

        let rows_affected = tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![id.to_string()],
        )?;
        tx.commit()?;

        if rows_affected > 0 {
            debug!("Deleted conversation {} (messages cascaded)", id);
        }
        Ok(rows_affected > 0)
    }

    /// Top-k conversations for a user by summary similarity.
    ///
    /// Conversations without a summary embedding are not considered.
    pub fn search_conversations(
        &self,
        user_id: UserId,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(Conversation, f32)>> {
        validate_embedding_result(query_embedding, self.embedding_dimensions())?;
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id FROM conversations WHERE user_id = ?1 AND summary_embedding IS NOT NULL",
        )?;
        let candidates: Vec<String> = stmt
            .query_map(params![user_id.to_string()], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let ranked = vector::search_among(
            &conn,
            EmbeddingColumn::ConversationSummary,
            query_embedding,
            &candidates,
            limit,
        )?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, user_id, title, summary, summary_embedding, status, created_at, updated_at
            FROM conversations
            WHERE id = ?1
            "#,
        )?;
        let mut results = Vec::with_capacity(ranked.len());
        for hit in ranked {
            let mut rows = stmt.query(params![hit.id])?;
            if let Some(row) = rows.next()? {
                results.push((Self::row_to_conversation(row)?, hit.distance));
            }
        }
        Ok(results)
    }

    pub(crate) fn row_to_conversation(row: &rusqlite::Row) -> Result<Conversation> {
        let id_str: String = row.get(0)?;
        let user_id_str: String = row.get(1)?;
        let title: Option<String> = row.get(2)?;
        let summary: Option<String> = row.get(3)?;
        let embedding_blob: Option<Vec<u8>> = row.get(4)?;
        let status_str: String = row.get(5)?;
        let created_at_str: String = row.get(6)?;
        let updated_at_str: String = row.get(7)?;

        let status = ConversationStatus::parse(&status_str).ok_or_else(|| {
            StoreError::InvalidData(format!("Unknown conversation status: {status_str}"))
        })?;
        let summary_embedding = embedding_blob
            .as_deref()
            .map(vector::blob_to_embedding)
            .transpose()?;

        Ok(Conversation {
            id: ConversationId::parse(&id_str)?,
            user_id: UserId::parse(&user_id_str)?,
            title,
            summary,
            summary_embedding,
            status,
            created_at: parse_timestamp(&created_at_str)?,
            updated_at: parse_timestamp(&updated_at_str)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_types::{Message, Role};

    fn create_test_store() -> ConversationStore {
        ConversationStore::open_in_memory().unwrap()
    }

    fn embedding(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 1536];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_conversation_crud() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();

        let conversation = store.create_conversation(user.id).unwrap();
        assert_eq!(conversation.status, ConversationStatus::Active);

        let fetched = store.get_conversation(conversation.id).unwrap().unwrap();
        assert_eq!(fetched.user_id, user.id);
        assert_eq!(fetched.title.as_deref(), Some("New Conversation"));
        assert!(fetched.summary.is_none());

        store
            .set_conversation_status(conversation.id, ConversationStatus::Archived)
            .unwrap();
        let fetched = store.get_conversation(conversation.id).unwrap().unwrap();
        assert_eq!(fetched.status, ConversationStatus::Archived);

        assert!(store.delete_conversation(conversation.id).unwrap());
        assert!(store.get_conversation(conversation.id).unwrap().is_none());
        assert!(!store.delete_conversation(conversation.id).unwrap());
    }

    #[test]
    fn test_conversation_requires_existing_user() {
        let store = create_test_store();
        let err = store.create_conversation(UserId::new()).unwrap_err();
        assert!(err.is_foreign_key_violation());
    }

    #[test]
    fn test_list_by_user_ordering() {
        let store = create_test_store();
        let alice = store.create_user("alice").unwrap();
        let bob = store.create_user("bob").unwrap();

        let first = store.create_conversation(alice.id).unwrap();
        let second = store.create_conversation(alice.id).unwrap();
        store.create_conversation(bob.id).unwrap();

        // Touching the older conversation moves it to the front.
        store
            .update_conversation_summary(first.id, "about rust", &embedding(0))
            .unwrap();

        let list = store.list_conversations_by_user(alice.id).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, first.id);
        assert_eq!(list[1].id, second.id);
    }

    #[test]
    fn test_update_summary_round_trips_embedding() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();
        let conversation = store.create_conversation(user.id).unwrap();

        store
            .update_conversation_summary(conversation.id, "a summary", &embedding(3))
            .unwrap();

        let fetched = store.get_conversation(conversation.id).unwrap().unwrap();
        assert_eq!(fetched.summary.as_deref(), Some("a summary"));
        assert_eq!(fetched.summary_embedding.unwrap(), embedding(3));

        // Wrong dimensionality is rejected before it reaches storage.
        let err = store
            .update_conversation_summary(conversation.id, "bad", &[1.0, 2.0])
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[test]
    fn test_delete_cascades_messages_exactly() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();
        let doomed = store.create_conversation(user.id).unwrap();
        let kept = store.create_conversation(user.id).unwrap();

        for i in 0..3 {
            store
                .insert_message(&Message::new(
                    doomed.id,
                    Role::User,
                    format!("doomed {i}"),
                    embedding(i),
                ))
                .unwrap();
        }
        store
            .insert_message(&Message::new(kept.id, Role::User, "kept", embedding(9)))
            .unwrap();

        store.delete_conversation(doomed.id).unwrap();

        assert!(store.list_messages(doomed.id).unwrap().is_empty());
        let survivors = store.list_messages(kept.id).unwrap();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].message, "kept");
    }

    #[test]
    fn test_delete_clears_index_entries() {
        vector::init_vector_extension();
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();
        let conversation = store.create_conversation(user.id).unwrap();
        store
            .update_conversation_summary(conversation.id, "doomed", &embedding(1))
            .unwrap();

        {
            let conn = store.conn.lock().unwrap();
            vector::create_index(&conn, EmbeddingColumn::Message, 1536).unwrap();
            vector::create_index(&conn, EmbeddingColumn::ConversationSummary, 1536).unwrap();
        }
        store
            .insert_message(&Message::new(conversation.id, Role::User, "hi", embedding(0)))
            .unwrap();

        store.delete_conversation(conversation.id).unwrap();

        // Neither index keeps entries for cascaded rows.
        let conn = store.conn.lock().unwrap();
        let message_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM message_embedding_idx", [], |row| {
                row.get(0)
            })
            .unwrap();
        let summary_rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM conversation_embedding_idx",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(message_rows, 0);
        assert_eq!(summary_rows, 0);
    }

    #[test]
    fn test_search_conversations_by_summary() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();

        let rust = store.create_conversation(user.id).unwrap();
        store
            .update_conversation_summary(rust.id, "rust borrowing", &embedding(0))
            .unwrap();

        let cooking = store.create_conversation(user.id).unwrap();
        store
            .update_conversation_summary(cooking.id, "pasta recipes", &embedding(100))
            .unwrap();

        // No summary yet: excluded from search.
        store.create_conversation(user.id).unwrap();

        let results = store
            .search_conversations(user.id, &embedding(0), 2)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.id, rust.id);
        assert!(results[0].1 < results[1].1);
    }
}

//! Memory entry lifecycle: insert, search, evict, and the audit trail.
//!
//! Entries move through one-way transitions. Eviction clears `is_active`,
//! stamps `evicted_at`, and appends an audit row in the same transaction,
//! so the flag and the trail can never disagree. Summarization and updates
//! audit too but leave the entry active.

use rusqlite::{Connection, params};
use tracing::debug;

use mnemo_types::{AuditAction, AuditRecord, MemoryEntry, MemoryEntryId, MemoryType, UserId, now};

use crate::error::{Result, StoreError};
use crate::validation::{validate_content, validate_embedding_result};
use crate::vector::{self, EmbeddingColumn};

use super::ConversationStore;
use super::user_ops::parse_timestamp;

const MEMORY_COLUMNS: &str = "id, user_id, memory_type, content, meta_info, embedding, \
     is_active, evicted_at, created_at";

impl ConversationStore {
    /// Create and persist a new active memory entry.
    pub fn create_memory_entry(
        &self,
        user_id: UserId,
        memory_type: MemoryType,
        content: &str,
        embedding: Vec<f32>,
    ) -> Result<MemoryEntry> {
        let entry = MemoryEntry::new(user_id, memory_type, content, embedding);
        self.insert_memory_entry(&entry)?;
        Ok(entry)
    }

    /// Insert an existing memory entry.
    pub fn insert_memory_entry(&self, entry: &MemoryEntry) -> Result<()> {
        validate_content(&entry.content)?;
        validate_embedding_result(&entry.embedding, self.embedding_dimensions())?;
        let conn = self.conn.lock().unwrap();

        conn.execute(
            &format!(
                "INSERT INTO memory_entries ({MEMORY_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                entry.id.to_string(),
                entry.user_id.to_string(),
                entry.memory_type.as_str(),
                entry.content,
                serde_json::to_string(&entry.meta_info)?,
                vector::embedding_to_blob(&entry.embedding),
                entry.is_active,
                entry.evicted_at.map(|t| t.to_rfc3339()),
                entry.created_at.to_rfc3339(),
            ],
        )?;

        vector::upsert_index_entry(
            &conn,
            EmbeddingColumn::MemoryEntry,
            &entry.id.to_string(),
            &entry.embedding,
        )?;

        debug!(
            "Inserted {} memory {} for user {}",
            entry.memory_type.as_str(),
            entry.id,
            entry.user_id
        );
        Ok(())
    }

    /// Get a memory entry by ID, active or not.
    pub fn get_memory_entry(&self, id: MemoryEntryId) -> Result<Option<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memory_entries WHERE id = ?1"
        ))?;
        let mut rows = stmt.query(params![id.to_string()])?;

        if let Some(row) = rows.next()? {
            Ok(Some(Self::row_to_memory_entry(row)?))
        } else {
            Ok(None)
        }
    }

    /// List a user's active memory entries, optionally restricted to one type.
    pub fn list_active_memories(
        &self,
        user_id: UserId,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memory_entries \
             WHERE user_id = ?1 AND is_active = 1"
        );
        if memory_type.is_some() {
            sql.push_str(" AND memory_type = ?2");
        }
        sql.push_str(" ORDER BY created_at");

        let mut stmt = conn.prepare(&sql)?;
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(user_id.to_string())];
        if let Some(mt) = memory_type {
            params_vec.push(Box::new(mt.as_str()));
        }
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|b| b.as_ref()).collect();

        let mut rows = stmt.query(params_refs.as_slice())?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(Self::row_to_memory_entry(row)?);
        }
        Ok(entries)
    }

    /// Top-k active memory entries for a user by embedding similarity.
    ///
    /// Evicted entries never match, regardless of how close they sit.
    pub fn search_memories(
        &self,
        user_id: UserId,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(MemoryEntry, f32)>> {
        validate_embedding_result(query_embedding, self.embedding_dimensions())?;
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT id FROM memory_entries WHERE user_id = ?1 AND is_active = 1")?;
        let candidates: Vec<String> = stmt
            .query_map(params![user_id.to_string()], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;

        let ranked = vector::search_among(
            &conn,
            EmbeddingColumn::MemoryEntry,
            query_embedding,
            &candidates,
            limit,
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memory_entries WHERE id = ?1"
        ))?;
        let mut results = Vec::with_capacity(ranked.len());
        for hit in ranked {
            let mut rows = stmt.query(params![hit.id])?;
            if let Some(row) = rows.next()? {
                results.push((Self::row_to_memory_entry(row)?, hit.distance));
            }
        }
        Ok(results)
    }

    /// Evict an active memory entry.
    ///
    /// Clears the active flag, stamps `evicted_at`, and appends an
    /// `evicted` audit row, all in one transaction. Eviction is terminal:
    /// evicting an entry twice is an error and leaves no trace.
    pub fn evict_memory(
        &self,
        id: MemoryEntryId,
        detail: serde_json::Value,
    ) -> Result<()> {
        let detail_json = serde_json::to_string(&detail)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        require_active(&tx, id)?;

        let evicted_at = now().to_rfc3339();
        tx.execute(
            "UPDATE memory_entries SET is_active = 0, evicted_at = ?2 WHERE id = ?1",
            params![id.to_string(), evicted_at],
        )?;
        append_audit(&tx, id, AuditAction::Evicted, &detail_json)?;
        vector::remove_index_entries(&tx, EmbeddingColumn::MemoryEntry, &[id.to_string()])?;

        tx.commit()?;
        debug!("Evicted memory entry {id}");
        Ok(())
    }

    /// Record that an active entry was folded into a summary.
    ///
    /// The entry stays active; only the audit trail grows.
    pub fn summarize_memory(
        &self,
        id: MemoryEntryId,
        detail: serde_json::Value,
    ) -> Result<()> {
        let detail_json = serde_json::to_string(&detail)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        require_active(&tx, id)?;
        append_audit(&tx, id, AuditAction::Summarized, &detail_json)?;

        tx.commit()?;
        Ok(())
    }

    /// Rewrite an active entry's content and embedding, with an audit row.
    pub fn update_memory_entry(
        &self,
        id: MemoryEntryId,
        content: &str,
        embedding: &[f32],
        detail: serde_json::Value,
    ) -> Result<()> {
        validate_content(content)?;
        validate_embedding_result(embedding, self.embedding_dimensions())?;
        let detail_json = serde_json::to_string(&detail)?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        require_active(&tx, id)?;
        tx.execute(
            "UPDATE memory_entries SET content = ?2, embedding = ?3 WHERE id = ?1",
            params![id.to_string(), content, vector::embedding_to_blob(embedding)],
        )?;
        append_audit(&tx, id, AuditAction::Updated, &detail_json)?;
        vector::upsert_index_entry(&tx, EmbeddingColumn::MemoryEntry, &id.to_string(), embedding)?;

        tx.commit()?;
        debug!("Updated memory entry {id}");
        Ok(())
    }

    /// An entry's audit trail, oldest first.
    pub fn audit_log(&self, entry_id: MemoryEntryId) -> Result<Vec<AuditRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT log_id, entry_id, action, detail, action_time \
             FROM memory_audit_log WHERE entry_id = ?1 ORDER BY log_id",
        )?;
        let mut rows = stmt.query(params![entry_id.to_string()])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let entry_id_str: String = row.get(1)?;
            let action_str: String = row.get(2)?;
            let detail_str: String = row.get(3)?;
            let action_time_str: String = row.get(4)?;

            let action = AuditAction::parse(&action_str).ok_or_else(|| {
                StoreError::InvalidData(format!("Unknown audit action: {action_str}"))
            })?;

            records.push(AuditRecord {
                log_id: row.get(0)?,
                entry_id: MemoryEntryId::parse(&entry_id_str)?,
                action,
                detail: serde_json::from_str(&detail_str)?,
                action_time: parse_timestamp(&action_time_str)?,
            });
        }
        Ok(records)
    }

    pub(crate) fn row_to_memory_entry(row: &rusqlite::Row) -> Result<MemoryEntry> {
        let id_str: String = row.get(0)?;
        let user_id_str: String = row.get(1)?;
        let memory_type_str: String = row.get(2)?;
        let content: String = row.get(3)?;
        let meta_info_str: String = row.get(4)?;
        let embedding_blob: Vec<u8> = row.get(5)?;
        let is_active: bool = row.get(6)?;
        let evicted_at_str: Option<String> = row.get(7)?;
        let created_at_str: String = row.get(8)?;

        let memory_type = MemoryType::parse(&memory_type_str).ok_or_else(|| {
            StoreError::InvalidData(format!("Unknown memory type: {memory_type_str}"))
        })?;

        Ok(MemoryEntry {
            id: MemoryEntryId::parse(&id_str)?,
            user_id: UserId::parse(&user_id_str)?,
            memory_type,
            content,
            meta_info: serde_json::from_str(&meta_info_str)?,
            embedding: vector::blob_to_embedding(&embedding_blob)?,
            is_active,
            evicted_at: evicted_at_str.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }
}

/// Fail unless the entry exists and is still active.
fn require_active(conn: &Connection, id: MemoryEntryId) -> Result<()> {
    let is_active: Option<bool> = conn
        .query_row(
            "SELECT is_active FROM memory_entries WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    match is_active {
        None => Err(StoreError::NotFound(format!("Memory entry {id}"))),
        Some(false) => Err(StoreError::InvalidData(format!(
            "memory entry {id} is already evicted"
        ))),
        Some(true) => Ok(()),
    }
}

/// Append one audit trail row inside the caller's transaction.
fn append_audit(
    conn: &Connection,
    entry_id: MemoryEntryId,
    action: AuditAction,
    detail_json: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO memory_audit_log (entry_id, action, detail, action_time) \
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entry_id.to_string(),
            action.as_str(),
            detail_json,
            now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_store() -> ConversationStore {
        ConversationStore::open_in_memory().unwrap()
    }

    fn embedding(hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 1536];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_create_and_list_memories() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();

        let persona = store
            .create_memory_entry(user.id, MemoryType::Persona, "is terse", embedding(0))
            .unwrap();
        store
            .create_memory_entry(user.id, MemoryType::Recall, "likes rust", embedding(1))
            .unwrap();

        let all = store.list_active_memories(user.id, None).unwrap();
        assert_eq!(all.len(), 2);

        let personas = store
            .list_active_memories(user.id, Some(MemoryType::Persona))
            .unwrap();
        assert_eq!(personas.len(), 1);
        assert_eq!(personas[0].id, persona.id);
        assert!(personas[0].is_active);
        assert!(personas[0].evicted_at.is_none());
    }

    #[test]
    fn test_memory_requires_known_user() {
        let store = create_test_store();
        let err = store
            .create_memory_entry(UserId::new(), MemoryType::Recall, "orphan", embedding(0))
            .unwrap_err();
        assert!(err.is_foreign_key_violation());
    }

    #[test]
    fn test_evict_flips_flag_and_audits_atomically() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();
        let entry = store
            .create_memory_entry(user.id, MemoryType::Recall, "stale fact", embedding(0))
            .unwrap();

        store
            .evict_memory(entry.id, json!({"reason": "superseded"}))
            .unwrap();

        let evicted = store.get_memory_entry(entry.id).unwrap().unwrap();
        assert!(!evicted.is_active);
        assert!(evicted.evicted_at.is_some());

        let trail = store.audit_log(entry.id).unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::Evicted);
        assert_eq!(trail[0].detail["reason"], "superseded");
    }

    #[test]
    fn test_eviction_is_terminal() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();
        let entry = store
            .create_memory_entry(user.id, MemoryType::Recall, "fact", embedding(0))
            .unwrap();

        store.evict_memory(entry.id, json!({})).unwrap();

        // A second eviction fails and leaves the trail and row untouched.
        let before = store.get_memory_entry(entry.id).unwrap().unwrap();
        assert!(store.evict_memory(entry.id, json!({})).is_err());
        let after = store.get_memory_entry(entry.id).unwrap().unwrap();
        assert_eq!(after.evicted_at, before.evicted_at);
        assert_eq!(store.audit_log(entry.id).unwrap().len(), 1);

        // So do summarize and update.
        assert!(store.summarize_memory(entry.id, json!({})).is_err());
        assert!(
            store
                .update_memory_entry(entry.id, "new", &embedding(1), json!({}))
                .is_err()
        );
        assert_eq!(store.audit_log(entry.id).unwrap().len(), 1);
    }

    #[test]
    fn test_evict_missing_entry_writes_nothing() {
        let store = create_test_store();
        let ghost = MemoryEntryId::new();

        assert!(matches!(
            store.evict_memory(ghost, json!({})).unwrap_err(),
            StoreError::NotFound(_)
        ));
        assert!(store.audit_log(ghost).unwrap().is_empty());
    }

    #[test]
    fn test_summarize_keeps_entry_active() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();
        let entry = store
            .create_memory_entry(user.id, MemoryType::Recall, "long fact", embedding(0))
            .unwrap();

        store
            .summarize_memory(entry.id, json!({"summary_of": 3}))
            .unwrap();

        let fetched = store.get_memory_entry(entry.id).unwrap().unwrap();
        assert!(fetched.is_active);

        let trail = store.audit_log(entry.id).unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::Summarized);
    }

    #[test]
    fn test_update_rewrites_content_and_audits() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();
        let entry = store
            .create_memory_entry(user.id, MemoryType::UserProfile, "likes tea", embedding(0))
            .unwrap();

        store
            .update_memory_entry(entry.id, "likes coffee", &embedding(1), json!({}))
            .unwrap();

        let fetched = store.get_memory_entry(entry.id).unwrap().unwrap();
        assert_eq!(fetched.content, "likes coffee");
        assert_eq!(fetched.embedding, embedding(1));
        assert!(fetched.is_active);

        let trail = store.audit_log(entry.id).unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::Updated);
    }

    #[test]
    fn test_audit_trail_is_ordered() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();
        let entry = store
            .create_memory_entry(user.id, MemoryType::Recall, "fact", embedding(0))
            .unwrap();

        store
            .update_memory_entry(entry.id, "fact v2", &embedding(1), json!({"rev": 2}))
            .unwrap();
        store.summarize_memory(entry.id, json!({})).unwrap();
        store.evict_memory(entry.id, json!({})).unwrap();

        let trail = store.audit_log(entry.id).unwrap();
        let actions: Vec<AuditAction> = trail.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Updated,
                AuditAction::Summarized,
                AuditAction::Evicted
            ]
        );
        assert!(trail.windows(2).all(|w| w[0].log_id < w[1].log_id));
    }

    #[test]
    fn test_unknown_audit_action_is_check_violation() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();
        let entry = store
            .create_memory_entry(user.id, MemoryType::Recall, "fact", embedding(0))
            .unwrap();

        let conn = store.conn.lock().unwrap();
        let err = conn
            .execute(
                "INSERT INTO memory_audit_log (entry_id, action, detail, action_time) \
                 VALUES (?1, 'archived', '{}', ?2)",
                params![entry.id.to_string(), now().to_rfc3339()],
            )
            .map_err(StoreError::from)
            .unwrap_err();
        assert!(err.is_check_violation());
    }

    #[test]
    fn test_search_excludes_evicted() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();

        let near = store
            .create_memory_entry(user.id, MemoryType::Recall, "near", embedding(0))
            .unwrap();
        let nearest = store
            .create_memory_entry(user.id, MemoryType::Recall, "nearest", embedding(0))
            .unwrap();
        store
            .create_memory_entry(user.id, MemoryType::Recall, "far", embedding(500))
            .unwrap();

        store.evict_memory(nearest.id, json!({})).unwrap();

        let results = store.search_memories(user.id, &embedding(0), 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.id, near.id);
        assert!(results.iter().all(|(e, _)| e.id != nearest.id));
    }

    #[test]
    fn test_search_scoped_to_user() {
        let store = create_test_store();
        let alice = store.create_user("alice").unwrap();
        let bob = store.create_user("bob").unwrap();

        store
            .create_memory_entry(alice.id, MemoryType::Recall, "hers", embedding(0))
            .unwrap();
        store
            .create_memory_entry(bob.id, MemoryType::Recall, "his", embedding(0))
            .unwrap();

        let results = store.search_memories(alice.id, &embedding(0), 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.content, "hers");
    }

    #[test]
    fn test_meta_info_round_trip() {
        let store = create_test_store();
        let user = store.create_user("alice").unwrap();

        let entry = MemoryEntry::new(user.id, MemoryType::Archival, "doc", embedding(0))
            .with_meta(json!({"source": "import", "batch": 7}));
        store.insert_memory_entry(&entry).unwrap();

        let fetched = store.get_memory_entry(entry.id).unwrap().unwrap();
        assert_eq!(fetched.meta_info["source"], "import");
        assert_eq!(fetched.meta_info["batch"], 7);
    }
}

//! Vector storage and similarity search.
//!
//! Embeddings live in BLOB columns on the base tables (little-endian f32),
//! so similarity queries are always answerable by a linear scan. sqlite-vec
//! `vec0` virtual tables act as an optional approximate index over each
//! embedding column family: creating, dropping, or rebuilding an index is a
//! tuning step, never a migration, and queries fall back to the scan when
//! the index is absent. Same results, different speed.

use rusqlite::{Connection, params};
use tracing::{debug, info};
use zerocopy::IntoBytes;

use crate::error::{Result, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Default embedding dimensions recorded by migration unit 001.
pub const DEFAULT_EMBEDDING_DIMS: usize = 1536;

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Encode an embedding as little-endian f32 bytes for BLOB storage.
pub fn embedding_to_blob(embedding: &[f32]) -> &[u8] {
    embedding.as_bytes()
}

/// Decode a BLOB back into an embedding.
pub fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::InvalidData(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Euclidean (L2) distance between two equal-length vectors.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Column Families
// ─────────────────────────────────────────────────────────────────────────────

/// An embedding column that can carry an approximate index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingColumn {
    /// `messages.message_embedding`
    Message,
    /// `conversations.summary_embedding`
    ConversationSummary,
    /// `memory_entries.embedding`
    MemoryEntry,
}

impl EmbeddingColumn {
    /// The vec0 virtual table backing this column's index.
    pub fn index_table(&self) -> &'static str {
        match self {
            Self::Message => "message_embedding_idx",
            Self::ConversationSummary => "conversation_embedding_idx",
            Self::MemoryEntry => "memory_embedding_idx",
        }
    }

    /// The base table holding the authoritative BLOB.
    pub fn base_table(&self) -> &'static str {
        match self {
            Self::Message => "messages",
            Self::ConversationSummary => "conversations",
            Self::MemoryEntry => "memory_entries",
        }
    }

    /// The embedding column on the base table.
    pub fn embedding_column(&self) -> &'static str {
        match self {
            Self::Message => "message_embedding",
            Self::ConversationSummary => "summary_embedding",
            Self::MemoryEntry => "embedding",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extension & Index Management
// ─────────────────────────────────────────────────────────────────────────────

/// Register the sqlite-vec extension for all future connections.
///
/// Must run before opening a connection that uses the indexed path.
/// `sqlite3_auto_extension` applies process-wide.
pub fn init_vector_extension() {
    use rusqlite::ffi::sqlite3_auto_extension;
    use sqlite_vec::sqlite3_vec_init;

    unsafe {
        #[allow(clippy::missing_transmute_annotations)]
        sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
    }
}

/// Check if the sqlite-vec extension is loaded, returning its version.
pub fn check_vector_extension(conn: &Connection) -> Result<String> {
    let version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
    Ok(version)
}

/// Create the approximate index for one embedding column family and
/// backfill it from the base table.
///
/// Once an index exists, every search goes through it, so it must hold
/// every row the base table already has or queries would silently lose
/// results. Returns the number of rows indexed; a no-op (returning 0) when
/// the index already exists.
///
/// `dims` is a tuning parameter: it must match what the callers write, but
/// query correctness never depends on the index existing at all.
pub fn create_index(conn: &Connection, column: EmbeddingColumn, dims: usize) -> Result<usize> {
    if has_index(conn, column)? {
        return Ok(0);
    }

    let sql = format!(
        "CREATE VIRTUAL TABLE {} USING vec0(id TEXT PRIMARY KEY, embedding float[{dims}])",
        column.index_table()
    );
    conn.execute_batch(&sql)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT id, {} FROM {} WHERE {} IS NOT NULL",
        column.embedding_column(),
        column.base_table(),
        column.embedding_column(),
    ))?;
    let mut rows = stmt.query([])?;

    let mut indexed = 0usize;
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, embedding) VALUES (?1, ?2)",
                column.index_table()
            ),
            params![id, blob],
        )?;
        indexed += 1;
    }

    info!(
        "Created {} index ({} dimensions, {indexed} rows backfilled)",
        column.index_table(),
        dims
    );
    Ok(indexed)
}

/// Drop the approximate index for one embedding column family.
pub fn drop_index(conn: &Connection, column: EmbeddingColumn) -> Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", column.index_table()))?;
    info!("Dropped {} index", column.index_table());
    Ok(())
}

/// Check whether the index for a column family exists.
pub fn has_index(conn: &Connection, column: EmbeddingColumn) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1",
        params![column.index_table()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Drop, recreate, and repopulate an index from its base table.
///
/// Returns the number of rows indexed.
pub fn rebuild_index(conn: &Connection, column: EmbeddingColumn, dims: usize) -> Result<usize> {
    drop_index(conn, column)?;
    let indexed = create_index(conn, column, dims)?;
    info!("Rebuilt {} index ({indexed} rows)", column.index_table());
    Ok(indexed)
}

/// Insert or replace one entry in a column family's index.
///
/// No-op when the index does not exist.
pub fn upsert_index_entry(
    conn: &Connection,
    column: EmbeddingColumn,
    id: &str,
    embedding: &[f32],
) -> Result<()> {
    if !has_index(conn, column)? {
        return Ok(());
    }

    // vec0 doesn't support INSERT OR REPLACE, so delete first if exists
    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", column.index_table()),
        params![id],
    )?;
    conn.execute(
        &format!(
            "INSERT INTO {} (id, embedding) VALUES (?1, ?2)",
            column.index_table()
        ),
        params![id, embedding.as_bytes()],
    )?;

    debug!("Indexed {} in {}", id, column.index_table());
    Ok(())
}

/// Remove entries from a column family's index.
///
/// No-op when the index does not exist.
pub fn remove_index_entries(
    conn: &Connection,
    column: EmbeddingColumn,
    ids: &[String],
) -> Result<()> {
    if ids.is_empty() || !has_index(conn, column)? {
        return Ok(());
    }

    for id in ids {
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", column.index_table()),
            params![id],
        )?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Similarity Search
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a similarity search.
#[derive(Debug, Clone)]
pub struct SimilarityResult {
    /// Row id in the base table.
    pub id: String,
    /// L2 distance from the query vector (lower = more similar).
    pub distance: f32,
}

/// Search a column family for the `limit` nearest rows among `candidates`.
///
/// Uses the approximate index when it exists, otherwise linearly scans the
/// candidates' BLOBs. An empty candidate set returns no results.
pub fn search_among(
    conn: &Connection,
    column: EmbeddingColumn,
    query: &[f32],
    candidates: &[String],
    limit: usize,
) -> Result<Vec<SimilarityResult>> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    if has_index(conn, column)? {
        search_indexed(conn, column, query, candidates, limit)
    } else {
        scan_candidates(conn, column, query, candidates, limit)
    }
}

/// Indexed path: vec0 MATCH restricted to the candidate ids.
fn search_indexed(
    conn: &Connection,
    column: EmbeddingColumn,
    query: &[f32],
    candidates: &[String],
    limit: usize,
) -> Result<Vec<SimilarityResult>> {
    let placeholders: Vec<String> = (0..candidates.len())
        .map(|i| format!("?{}", i + 3))
        .collect();
    let sql = format!(
        "SELECT id, distance FROM {} WHERE embedding MATCH ?1 AND id IN ({}) ORDER BY distance LIMIT ?2",
        column.index_table(),
        placeholders.join(", "),
    );

    let mut stmt = conn.prepare(&sql)?;

    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(query.as_bytes().to_vec()),
        Box::new(limit as i64),
    ];
    for id in candidates {
        params_vec.push(Box::new(id.clone()));
    }
    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();

    let mut rows = stmt.query(params_refs.as_slice())?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        results.push(SimilarityResult {
            id: row.get(0)?,
            distance: row.get(1)?,
        });
    }

    debug!(
        "Indexed search over {} found {} of {} candidates",
        column.index_table(),
        results.len(),
        candidates.len()
    );
    Ok(results)
}

/// Fallback path: decode candidate BLOBs and rank by L2 distance in memory.
fn scan_candidates(
    conn: &Connection,
    column: EmbeddingColumn,
    query: &[f32],
    candidates: &[String],
    limit: usize,
) -> Result<Vec<SimilarityResult>> {
    let placeholders: Vec<String> = (0..candidates.len())
        .map(|i| format!("?{}", i + 1))
        .collect();
    let sql = format!(
        "SELECT id, {} FROM {} WHERE id IN ({}) AND {} IS NOT NULL",
        column.embedding_column(),
        column.base_table(),
        placeholders.join(", "),
        column.embedding_column(),
    );

    let mut stmt = conn.prepare(&sql)?;
    let params_refs: Vec<&dyn rusqlite::ToSql> =
        candidates.iter().map(|id| id as &dyn rusqlite::ToSql).collect();

    let mut rows = stmt.query(params_refs.as_slice())?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        let embedding = blob_to_embedding(&blob)?;
        if embedding.len() != query.len() {
            continue;
        }
        results.push(SimilarityResult {
            id,
            distance: l2_distance(query, &embedding),
        });
    }

    results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    results.truncate(limit);

    debug!(
        "Scanned {} candidates in {} (limit {limit})",
        candidates.len(),
        column.base_table()
    );
    Ok(results)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

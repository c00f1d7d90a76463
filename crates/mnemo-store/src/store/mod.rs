//! Conversation store implementation using SQLite.
//!
//! One database file holds the identity, conversation, message, and memory
//! tables plus the migration ledger. The store wraps a single connection in
//! a mutex; WAL mode keeps concurrent readers cheap and `foreign_keys=ON`
//! enforces the referential contract (including cascade delete of messages
//! under their conversation).

mod conversation_ops;
mod memory_ops;
mod message_ops;
mod user_ops;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::error::{Result, StoreError};
use crate::migrate::{AppliedMigration, MigrationUnit, Migrator};
use crate::vector::DEFAULT_EMBEDDING_DIMS;

// ─────────────────────────────────────────────────────────────────────────────
// Conversation Store
// ─────────────────────────────────────────────────────────────────────────────

/// Conversation and memory store backed by SQLite.
pub struct ConversationStore {
    /// The SQLite connection (wrapped in Mutex for thread safety).
    pub(crate) conn: Mutex<Connection>,
    /// Embedding dimensionality recorded in schema metadata.
    dims: usize,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("dims", &self.dims)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl ConversationStore {
    /// Open or create a store at the given path and bring its schema up to
    /// the latest version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut store = Self::open_unmigrated(path.as_ref())?;
        store.migrate_all()?;
        store.refresh_dims()?;
        info!("Conversation store opened at {:?}", path.as_ref());
        Ok(store)
    }

    /// Create a fully migrated in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self::from_connection(conn)?;
        store.migrate_all()?;
        store.refresh_dims()?;
        info!("In-memory store created");
        Ok(store)
    }

    /// Open a store without applying any migrations.
    ///
    /// Schema application is then driven explicitly through the migration
    /// methods; this is what the CLI and the sequencer tests use.
    pub fn open_unmigrated(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .map_err(|_| StoreError::Database(rusqlite::Error::InvalidPath(path.into())))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;
        Self::from_connection(conn)
    }

    /// Unmigrated in-memory store.
    pub fn open_unmigrated_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // WAL for concurrent reads; foreign keys carry the referential
        // contract, including ON DELETE CASCADE for messages.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Mutex::new(conn),
            dims: DEFAULT_EMBEDDING_DIMS,
        })
    }

    /// Re-read the embedding dimensionality from schema metadata.
    fn refresh_dims(&mut self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let dims: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'embedding.dimensions'",
                [],
                |row| row.get(0),
            )
            .ok();
        if let Some(d) = dims.and_then(|s| s.parse().ok()) {
            self.dims = d;
        }
        Ok(())
    }

    /// Embedding dimensionality this store's vector columns expect.
    pub fn embedding_dimensions(&self) -> usize {
        self.dims
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Migrations
// ─────────────────────────────────────────────────────────────────────────────

impl ConversationStore {
    /// Apply all pending migration units. Returns the versions applied.
    pub fn migrate_all(&self) -> Result<Vec<u32>> {
        let mut conn = self.conn.lock().unwrap();
        Migrator::new(&mut conn).run()
    }

    /// Apply pending migration units up to and including `target`.
    pub fn migrate_to(&self, target: u32) -> Result<Vec<u32>> {
        let mut conn = self.conn.lock().unwrap();
        Migrator::new(&mut conn).run_to(target)
    }

    /// Applied migrations from the ledger, in version order.
    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let mut conn = self.conn.lock().unwrap();
        Migrator::new(&mut conn).applied()
    }

    /// Registry units not yet recorded in the ledger.
    pub fn pending_migrations(&self) -> Result<Vec<&'static MigrationUnit>> {
        let mut conn = self.conn.lock().unwrap();
        Migrator::new(&mut conn).pending()
    }

    /// Highest applied schema version, 0 on an empty store.
    pub fn schema_version(&self) -> Result<u32> {
        let mut conn = self.conn.lock().unwrap();
        Migrator::new(&mut conn).current_version()
    }

    /// Verify ledger checksums against the embedded migration SQL.
    pub fn verify_migrations(&self) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        Migrator::new(&mut conn).verify()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

impl ConversationStore {
    /// Execute a function within a transaction.
    ///
    /// All operations within the closure are executed atomically. If the
    /// closure returns an error, all changes are rolled back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        match f(&tx) {
            Ok(result) => {
                tx.commit()?;
                Ok(result)
            }
            // Transaction is rolled back when dropped
            Err(e) => Err(e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Row counts and schema facts for a store.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub user_count: usize,
    pub conversation_count: usize,
    pub message_count: usize,
    pub memory_entry_count: usize,
    pub active_memory_count: usize,
    pub audit_count: usize,
    pub schema_version: u32,
    pub embedding_dimensions: usize,
}

impl ConversationStore {
    /// Get database statistics.
    ///
    /// Fails on an unmigrated store, since the tables do not exist yet.
    pub fn stats(&self) -> Result<StoreStats> {
        let version = self.schema_version()?;
        let conn = self.conn.lock().unwrap();

        let count = |table: &str| -> Result<usize> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        };

        let active_memory_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_entries WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            user_count: count("users")?,
            conversation_count: count("conversations")?,
            message_count: count("messages")?,
            memory_entry_count: count("memory_entries")?,
            active_memory_count: active_memory_count as usize,
            audit_count: count("memory_audit_log")?,
            schema_version: version,
            embedding_dimensions: self.dims,
        })
    }
}

//! Forward-only schema migration sequencer.
//!
//! Migration units are numbered SQL scripts embedded at compile time and
//! applied in strictly ascending order, exactly once each. An applied unit
//! is recorded in the `schema_migrations` ledger together with a SHA-256
//! checksum of its SQL; re-running the sequencer skips applied units after
//! verifying that their recorded checksums still match the embedded SQL.
//!
//! Each unit applies inside a single transaction that also inserts its
//! ledger row. A unit is therefore all-or-nothing, and the ledger's
//! PRIMARY KEY doubles as the mutual-exclusion primitive: two concurrent
//! runs racing on the same unit cannot both commit the same version row.
//!
//! The raw [`Migrator::apply_unit`] path executes a unit's SQL without
//! consulting the ledger. Table creation is `IF NOT EXISTS` guarded but
//! index creation deliberately is not, so re-applying a unit this way fails
//! with [`StoreError::DuplicateObject`] instead of silently succeeding.

use chrono::Utc;
use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Migration Units
// ─────────────────────────────────────────────────────────────────────────────

/// One forward-only, numbered schema-change script.
#[derive(Debug, Clone, Copy)]
pub struct MigrationUnit {
    /// Numeric prefix; units apply in ascending order of this value.
    pub version: u32,
    /// Descriptive suffix of the unit name.
    pub name: &'static str,
    /// The unit's SQL, embedded at compile time.
    pub sql: &'static str,
}

impl MigrationUnit {
    /// SHA-256 checksum of the unit SQL, hex encoded.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

/// All migration units, in application order.
pub const UNITS: &[MigrationUnit] = &[
    MigrationUnit {
        version: 1,
        name: "create_schema_metadata",
        sql: include_str!("../sql/001_create_schema_metadata.sql"),
    },
    MigrationUnit {
        version: 2,
        name: "create_initial_conversation_module",
        sql: include_str!("../sql/002_create_initial_conversation_module.sql"),
    },
    MigrationUnit {
        version: 3,
        name: "create_memory_storage",
        sql: include_str!("../sql/003_create_memory_storage.sql"),
    },
];

/// Latest schema version the registry knows about.
pub const LATEST_VERSION: u32 = 3;

/// Find a unit by its version number.
pub fn find_unit(version: u32) -> Option<&'static MigrationUnit> {
    UNITS.iter().find(|u| u.version == version)
}

/// Verify the registry is well formed: versions strictly ascending, so no
/// two units share a numeric prefix.
fn validate_registry(units: &[MigrationUnit]) -> Result<()> {
    for pair in units.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(StoreError::Migration(format!(
                "migration registry out of order: {} does not ascend past {}",
                pair[1].version, pair[0].version
            )));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────────────────

/// A row from the `schema_migrations` ledger.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
    pub checksum: String,
    pub applied_at: String,
}

const CREATE_LEDGER_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    checksum TEXT NOT NULL,
    applied_at TEXT NOT NULL
)
"#;

// ─────────────────────────────────────────────────────────────────────────────
// Migrator
// ─────────────────────────────────────────────────────────────────────────────

/// Applies migration units against one connection.
pub struct Migrator<'a> {
    conn: &'a mut Connection,
}

impl<'a> Migrator<'a> {
    /// Create a migrator over a connection.
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Create the ledger table if it does not exist.
    pub fn ensure_ledger(&self) -> Result<()> {
        self.conn.execute_batch(CREATE_LEDGER_SQL)?;
        Ok(())
    }

    /// List applied migrations in version order.
    pub fn applied(&self) -> Result<Vec<AppliedMigration>> {
        self.ensure_ledger()?;

        let mut stmt = self.conn.prepare(
            "SELECT version, name, checksum, applied_at FROM schema_migrations ORDER BY version",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AppliedMigration {
                version: row.get(0)?,
                name: row.get(1)?,
                checksum: row.get(2)?,
                applied_at: row.get(3)?,
            })
        })?;

        let mut applied = Vec::new();
        for row in rows {
            applied.push(row?);
        }
        Ok(applied)
    }

    /// The highest applied version, or 0 on an empty store.
    pub fn current_version(&self) -> Result<u32> {
        self.ensure_ledger()?;

        let version: Option<u32> = self.conn.query_row(
            "SELECT MAX(version) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;
        Ok(version.unwrap_or(0))
    }

    /// Units in the registry that have not been applied yet.
    pub fn pending(&self) -> Result<Vec<&'static MigrationUnit>> {
        let current = self.current_version()?;
        Ok(UNITS.iter().filter(|u| u.version > current).collect())
    }

    /// Verify the recorded checksums of all applied units against the
    /// embedded SQL. A mismatch means a unit's script changed after it was
    /// applied, which forward-only migrations do not allow.
    pub fn verify(&self) -> Result<()> {
        for applied in self.applied()? {
            let Some(unit) = find_unit(applied.version) else {
                return Err(StoreError::Migration(format!(
                    "applied version {} is unknown to this binary",
                    applied.version
                )));
            };
            let expected = unit.checksum();
            if applied.checksum != expected {
                return Err(StoreError::Migration(format!(
                    "checksum mismatch for {:03}_{}: ledger has {}, unit is {}",
                    unit.version, unit.name, applied.checksum, expected
                )));
            }
        }
        Ok(())
    }

    /// Apply all not-yet-applied units, in order.
    ///
    /// Returns the versions applied by this run.
    pub fn run(&mut self) -> Result<Vec<u32>> {
        self.run_to(LATEST_VERSION)
    }

    /// Apply all not-yet-applied units up to and including `target`.
    ///
    /// Fails before touching the schema if `target` does not name a known
    /// unit, if the registry is malformed, or if an already-applied unit
    /// fails checksum verification.
    pub fn run_to(&mut self, target: u32) -> Result<Vec<u32>> {
        validate_registry(UNITS)?;
        if find_unit(target).is_none() {
            return Err(StoreError::Migration(format!(
                "unknown target version {target}"
            )));
        }

        self.ensure_ledger()?;
        self.verify()?;

        let current = self.current_version()?;
        let mut applied = Vec::new();

        for unit in UNITS {
            if unit.version <= current || unit.version > target {
                continue;
            }
            self.apply_with_ledger(unit)?;
            applied.push(unit.version);
        }

        if applied.is_empty() {
            debug!("Schema up to date (version {current})");
        } else {
            info!("Applied migrations {:?} (now at version {target})", applied);
        }
        Ok(applied)
    }

    /// Apply one unit and record it in the ledger, atomically.
    fn apply_with_ledger(&mut self, unit: &MigrationUnit) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute_batch(unit.sql).map_err(StoreError::from_ddl)?;

        // A concurrent run that already committed this version makes this
        // insert fail on the PRIMARY KEY, aborting the whole unit.
        tx.execute(
            "INSERT INTO schema_migrations (version, name, checksum, applied_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                unit.version,
                unit.name,
                unit.checksum(),
                Utc::now().to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        info!("Applied migration {:03}_{}", unit.version, unit.name);
        Ok(())
    }

    /// Execute a unit's SQL without consulting the ledger.
    ///
    /// Re-application unsafe: running this against a store that already has
    /// the unit fails with [`StoreError::DuplicateObject`] on the first
    /// unguarded statement. The unit still applies within one transaction.
    pub fn apply_unit(&mut self, unit: &MigrationUnit) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(unit.sql).map_err(StoreError::from_ddl)?;
        tx.commit()?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn open_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    fn domain_tables(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table'
                   AND name NOT LIKE 'sqlite_%'
                   AND name NOT IN ('schema_migrations', 'meta')
                 ORDER BY name",
            )
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_run_applies_all_units() {
        let mut conn = open_conn();
        let mut migrator = Migrator::new(&mut conn);

        let applied = migrator.run().unwrap();
        assert_eq!(applied, vec![1, 2, 3]);
        assert_eq!(migrator.current_version().unwrap(), LATEST_VERSION);

        assert_eq!(
            domain_tables(&conn),
            vec![
                "conversations",
                "memory_audit_log",
                "memory_entries",
                "messages",
                "users"
            ]
        );
    }

    #[test]
    fn test_run_is_reentrant_with_ledger() {
        let mut conn = open_conn();
        let mut migrator = Migrator::new(&mut conn);

        assert_eq!(migrator.run().unwrap(), vec![1, 2, 3]);
        // Second run sees the ledger and applies nothing.
        assert_eq!(migrator.run().unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_run_to_target_version() {
        let mut conn = open_conn();
        let mut migrator = Migrator::new(&mut conn);

        let applied = migrator.run_to(2).unwrap();
        assert_eq!(applied, vec![1, 2]);
        assert_eq!(migrator.current_version().unwrap(), 2);
        assert_eq!(
            domain_tables(&conn),
            vec!["conversations", "messages", "users"]
        );

        // Memory storage arrives with the remaining unit.
        let mut migrator = Migrator::new(&mut conn);
        let applied = migrator.run_to(3).unwrap();
        assert_eq!(applied, vec![3]);
        assert!(domain_tables(&conn).contains(&"memory_entries".to_string()));
    }

    #[test]
    fn test_registry_rejects_duplicate_or_descending_versions() {
        let duplicated = [
            MigrationUnit { version: 1, name: "first", sql: "" },
            MigrationUnit { version: 1, name: "second", sql: "" },
        ];
        assert!(matches!(
            validate_registry(&duplicated),
            Err(StoreError::Migration(_))
        ));

        let descending = [
            MigrationUnit { version: 2, name: "first", sql: "" },
            MigrationUnit { version: 1, name: "second", sql: "" },
        ];
        assert!(matches!(
            validate_registry(&descending),
            Err(StoreError::Migration(_))
        ));

        // The embedded registry itself is well formed.
        validate_registry(UNITS).unwrap();
    }

    #[test]
    fn test_run_to_unknown_target() {
        let mut conn = open_conn();
        let mut migrator = Migrator::new(&mut conn);
        assert!(matches!(
            migrator.run_to(42),
            Err(StoreError::Migration(_))
        ));
    }

    #[test]
    fn test_raw_reapply_fails_with_duplicate_object() {
        let mut conn = open_conn();
        let mut migrator = Migrator::new(&mut conn);

        let unit = find_unit(2).unwrap();
        migrator.apply_unit(unit).unwrap();

        // Tables are IF NOT EXISTS guarded, index creation is not: the
        // second application dies on the first index statement.
        let err = migrator.apply_unit(unit).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateObject(_)));
    }

    #[test]
    fn test_raw_apply_leaves_no_ledger_row() {
        let mut conn = open_conn();
        let mut migrator = Migrator::new(&mut conn);

        migrator.apply_unit(find_unit(1).unwrap()).unwrap();
        assert_eq!(migrator.current_version().unwrap(), 0);
    }

    #[test]
    fn test_verify_detects_checksum_mismatch() {
        let mut conn = open_conn();
        let mut migrator = Migrator::new(&mut conn);
        migrator.run().unwrap();

        conn.execute(
            "UPDATE schema_migrations SET checksum = 'tampered' WHERE version = 2",
            [],
        )
        .unwrap();

        let mut migrator = Migrator::new(&mut conn);
        let err = migrator.verify().unwrap_err();
        assert!(matches!(err, StoreError::Migration(_)));

        // run() refuses to proceed past the mismatch.
        assert!(migrator.run().is_err());
    }

    #[test]
    fn test_applied_ledger_contents() {
        let mut conn = open_conn();
        let mut migrator = Migrator::new(&mut conn);
        migrator.run_to(2).unwrap();

        let applied = migrator.applied().unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[0].version, 1);
        assert_eq!(applied[0].name, "create_schema_metadata");
        assert_eq!(applied[1].version, 2);
        assert_eq!(applied[1].checksum, find_unit(2).unwrap().checksum());
    }

    #[test]
    fn test_pending_lists_unapplied_units() {
        let mut conn = open_conn();
        let mut migrator = Migrator::new(&mut conn);

        let pending: Vec<u32> = migrator.pending().unwrap().iter().map(|u| u.version).collect();
        assert_eq!(pending, vec![1, 2, 3]);

        migrator.run_to(1).unwrap();
        let pending: Vec<u32> = migrator.pending().unwrap().iter().map(|u| u.version).collect();
        assert_eq!(pending, vec![2, 3]);
    }

    #[test]
    fn test_unit_failure_rolls_back_whole_unit() {
        let mut conn = open_conn();

        // Pre-create one of unit 2's indexes so the unit fails midway.
        conn.execute_batch(
            "CREATE TABLE placeholder (x); CREATE INDEX idx_messages_conversation ON placeholder (x);",
        )
        .unwrap();

        let mut migrator = Migrator::new(&mut conn);
        let err = migrator.run_to(2).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateObject(_)));

        // Unit 1 committed, unit 2 left nothing behind: no tables, no ledger row.
        assert_eq!(migrator.current_version().unwrap(), 1);
        let users_exists: bool = conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='users'")
            .unwrap()
            .exists([])
            .unwrap();
        assert!(!users_exists);
    }
}

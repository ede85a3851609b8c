//! Versioned, checksummed schema migrations.
//!
//! Each store keeps its own `schema_migrations` ledger. A version is applied at
//! most once; failed attempts stay in the ledger with `success = 0` until an
//! operator clears them with [`Migrator::retry`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{CoordinationError, Result, StoreContext};

/// Migrations shipped with the binary. Kept identical to the files in `migrations/`.
const EMBEDDED: &[(&str, &str)] = &[
    (
        "001_initial_schema.sql",
        include_str!("../../migrations/001_initial_schema.sql"),
    ),
    (
        "002_query_indexes.sql",
        include_str!("../../migrations/002_query_indexes.sql"),
    ),
];

/// Where migration files come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationSource {
    /// Only the files in the directory.
    Directory(PathBuf),
    Embedded,
    /// The embedded set, with directory files added or replacing by version.
    Overlay(PathBuf),
}

impl MigrationSource {
    /// Layer the directory over the embedded set if it exists, otherwise the embedded set alone.
    pub fn resolve(dir: &Path) -> Self {
        if dir.is_dir() {
            MigrationSource::Overlay(dir.to_path_buf())
        } else {
            MigrationSource::Embedded
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Migration {
    pub version: String,
    pub description: String,
    pub filename: String,
    #[serde(skip)]
    pub sql: String,
    pub checksum: String,
}

impl Migration {
    pub fn from_file(filename: &str, sql: &str) -> Option<Self> {
        let (version, description) = parse_filename(filename)?;
        Some(Self {
            version,
            description,
            filename: filename.to_string(),
            sql: sql.to_string(),
            checksum: checksum(sql),
        })
    }
}

/// One row of the `schema_migrations` ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub version: String,
    pub applied_at: String,
    pub checksum: String,
    pub description: String,
    pub execution_time_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChecksumMismatch {
    pub version: String,
    pub recorded: String,
    pub actual: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub total: usize,
    pub applied: usize,
    pub pending: usize,
    pub pending_migrations: Vec<Migration>,
    pub failed: Vec<LedgerEntry>,
    pub mismatches: Vec<ChecksumMismatch>,
}

/// Split `<version>_<description>.sql` into its parts.
pub fn parse_filename(filename: &str) -> Option<(String, String)> {
    let stem = filename.strip_suffix(".sql")?;
    let (version, rest) = stem.split_once('_')?;
    if version.is_empty() {
        return None;
    }
    Some((version.to_string(), rest.replace('_', " ")))
}

/// Lowercase hex SHA-256 of the migration content.
pub fn checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn embedded() -> Vec<Migration> {
    EMBEDDED
        .iter()
        .filter_map(|(name, sql)| Migration::from_file(name, sql))
        .collect()
}

fn read_dir(dir: &Path) -> Result<Vec<Migration>> {
    let mut found = Vec::new();
    let entries =
        std::fs::read_dir(dir).store_context(|| format!("read migrations directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry.store_context(|| format!("read migrations directory {}", dir.display()))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !path.is_file() || !name.ends_with(".sql") {
            continue;
        }
        let sql = std::fs::read_to_string(&path).store_context(|| format!("read migration {}", path.display()))?;
        match Migration::from_file(name, &sql) {
            Some(m) => found.push(m),
            None => warn!(file = %name, "skipping migration file without version prefix"),
        }
    }
    Ok(found)
}

pub struct Migrator {
    source: MigrationSource,
}

impl Migrator {
    pub fn new(source: MigrationSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// All migrations from the source, in version order.
    pub fn discover(&self) -> Result<Vec<Migration>> {
        let mut migrations = match &self.source {
            MigrationSource::Embedded => embedded(),
            MigrationSource::Directory(dir) => read_dir(dir)?,
            MigrationSource::Overlay(dir) => {
                let mut by_version: HashMap<String, Migration> =
                    embedded().into_iter().map(|m| (m.version.clone(), m)).collect();
                for m in read_dir(dir)? {
                    by_version.insert(m.version.clone(), m);
                }
                by_version.into_values().collect()
            }
        };
        migrations.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(migrations)
    }

    /// Read the ledger, creating it first if needed.
    pub fn ledger(&self, conn: &Connection) -> Result<Vec<LedgerEntry>> {
        ensure_ledger(conn)?;
        let mut stmt = conn
            .prepare(
                "SELECT version, applied_at, checksum, description, execution_time_ms, success, error_message
                 FROM schema_migrations ORDER BY version",
            )
            .store_context(|| "read migration ledger".to_string())?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerEntry {
                    version: row.get(0)?,
                    applied_at: row.get(1)?,
                    checksum: row.get(2)?,
                    description: row.get(3)?,
                    execution_time_ms: row.get(4)?,
                    success: row.get(5)?,
                    error_message: row.get(6)?,
                })
            })
            .store_context(|| "read migration ledger".to_string())?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .store_context(|| "read migration ledger".to_string())
    }

    /// Apply every pending migration, each in its own transaction.
    ///
    /// Returns the versions applied by this call. Refuses to run while the
    /// ledger holds a failed attempt or a checksum that no longer matches.
    pub fn migrate(&self, conn: &Connection) -> Result<Vec<String>> {
        let migrations = self.discover()?;
        let ledger: HashMap<String, LedgerEntry> = self
            .ledger(conn)?
            .into_iter()
            .map(|e| (e.version.clone(), e))
            .collect();

        if let Some(failed) = ledger.values().find(|e| !e.success) {
            return Err(CoordinationError::MigrationPreviouslyFailed(failed.version.clone()));
        }
        if let Some(mismatch) = find_mismatches(&migrations, &ledger).into_iter().next() {
            return Err(CoordinationError::ChecksumMismatch {
                version: mismatch.version,
                recorded: mismatch.recorded,
                actual: mismatch.actual,
            });
        }

        let mut applied = Vec::new();
        for migration in migrations.iter().filter(|m| !ledger.contains_key(&m.version)) {
            self.apply(conn, migration)?;
            applied.push(migration.version.clone());
        }

        if applied.is_empty() {
            debug!("schema up to date");
        }
        Ok(applied)
    }

    fn apply(&self, conn: &Connection, migration: &Migration) -> Result<()> {
        let started = Instant::now();
        let outcome = (|| -> rusqlite::Result<()> {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(&migration.sql)?;
            record(&tx, migration, started, None)?;
            tx.commit()
        })();

        match outcome {
            Ok(()) => {
                info!(
                    version = %migration.version,
                    description = %migration.description,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "applied migration"
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                warn!(version = %migration.version, error = %message, "migration failed");
                record(conn, migration, started, Some(&message)).store_context(|| {
                    format!("record failed migration {}", migration.version)
                })?;
                Err(CoordinationError::MigrationFailed {
                    version: migration.version.clone(),
                    message,
                })
            }
        }
    }

    pub fn status(&self, conn: &Connection) -> Result<MigrationStatus> {
        let migrations = self.discover()?;
        let ledger: HashMap<String, LedgerEntry> = self
            .ledger(conn)?
            .into_iter()
            .map(|e| (e.version.clone(), e))
            .collect();

        let mismatches = find_mismatches(&migrations, &ledger);
        let applied = migrations
            .iter()
            .filter(|m| ledger.get(&m.version).is_some_and(|e| e.success))
            .count();
        let pending_migrations: Vec<Migration> = migrations
            .iter()
            .filter(|m| !ledger.contains_key(&m.version))
            .cloned()
            .collect();
        let mut failed: Vec<LedgerEntry> = ledger.values().filter(|e| !e.success).cloned().collect();
        failed.sort_by(|a, b| a.version.cmp(&b.version));

        Ok(MigrationStatus {
            total: migrations.len(),
            applied,
            pending: pending_migrations.len(),
            pending_migrations,
            failed,
            mismatches,
        })
    }

    /// Clear a failed ledger entry so the next run re-attempts it.
    ///
    /// Returns false when the version has no failed entry.
    pub fn retry(&self, conn: &Connection, version: &str) -> Result<bool> {
        ensure_ledger(conn)?;
        let deleted = conn
            .execute(
                "DELETE FROM schema_migrations WHERE version = ?1 AND success = 0",
                params![version],
            )
            .store_context(|| format!("clear failed migration {}", version))?;
        Ok(deleted > 0)
    }
}

fn ensure_ledger(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL,
            checksum TEXT NOT NULL,
            description TEXT NOT NULL,
            execution_time_ms INTEGER NOT NULL,
            success INTEGER NOT NULL,
            error_message TEXT
        );",
    )
    .store_context(|| "create migration ledger".to_string())
}

fn record(
    conn: &Connection,
    migration: &Migration,
    started: Instant,
    error: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, checksum, description, execution_time_ms, success, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            migration.version,
            super::now(),
            migration.checksum,
            migration.description,
            started.elapsed().as_millis() as i64,
            error.is_none(),
            error,
        ],
    )?;
    Ok(())
}

fn find_mismatches(
    migrations: &[Migration],
    ledger: &HashMap<String, LedgerEntry>,
) -> Vec<ChecksumMismatch> {
    migrations
        .iter()
        .filter_map(|m| {
            let entry = ledger.get(&m.version)?;
            (entry.success && entry.checksum != m.checksum).then(|| ChecksumMismatch {
                version: m.version.clone(),
                recorded: entry.checksum.clone(),
                actual: m.checksum.clone(),
            })
        })
        .collect()
}

/// Write a new timestamp-versioned migration scaffold into `dir`.
pub fn create_migration(dir: &Path, name: &str, now: DateTime<Utc>) -> Result<PathBuf> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoordinationError::InvalidValue {
            field: "migration name",
            value: name.to_string(),
        });
    }

    let version = now.format("%Y%m%d%H%M%S").to_string();
    let slug = trimmed.to_lowercase().replace([' ', '-'], "_");
    let path = dir.join(format!("{}_{}.sql", version, slug));

    let content = format!(
        "-- Migration: {}\n-- Version: {}\n-- Created: {}\n\n-- Up migration\n\n-- Down migration (not supported in SQLite)\n",
        trimmed,
        version,
        now.to_rfc3339()
    );

    std::fs::create_dir_all(dir)
        .store_context(|| format!("create migrations directory {}", dir.display()))?;
    if path.exists() {
        return Err(CoordinationError::InvalidValue {
            field: "migration file",
            value: format!("{} already exists", path.display()),
        });
    }
    std::fs::write(&path, content).store_context(|| format!("write {}", path.display()))?;
    info!(path = %path.display(), "created migration");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    fn write_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, sql) in files {
            fs::write(dir.path().join(name), sql).unwrap();
        }
        dir
    }

    #[test]
    fn test_migrate_from_zero() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();

        let applied = Migrator::new(MigrationSource::Embedded)
            .migrate(&conn)
            .expect("migration should succeed");
        assert_eq!(applied, vec!["001".to_string(), "002".to_string()]);

        let tables = table_names(&conn);
        for table in [
            "workflow_mappings",
            "agent_assignments",
            "workflow_results",
            "agent_configurations",
            "workflow_templates",
            "workflow_analytics",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        assert!(indexes.contains(&"idx_workflow_mappings_status".to_string()));
        assert!(indexes.contains(&"idx_agent_assignments_workflow".to_string()));
    }

    #[test]
    fn test_migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(MigrationSource::Embedded);

        migrator.migrate(&conn).expect("first migration should succeed");
        let first = migrator.ledger(&conn).unwrap();

        let applied = migrator.migrate(&conn).expect("second migration should succeed");
        assert!(applied.is_empty());
        assert_eq!(migrator.ledger(&conn).unwrap(), first);
    }

    #[test]
    fn test_embedded_matches_shipped_files() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
        let shipped = Migrator::new(MigrationSource::Directory(dir)).discover().unwrap();
        let embedded = Migrator::new(MigrationSource::Embedded).discover().unwrap();

        let shipped: Vec<_> = shipped.iter().map(|m| (&m.version, &m.checksum)).collect();
        let embedded: Vec<_> = embedded.iter().map(|m| (&m.version, &m.checksum)).collect();
        assert_eq!(shipped, embedded);
    }

    #[test]
    fn test_parse_filename() {
        assert_eq!(
            parse_filename("001_initial_schema.sql"),
            Some(("001".to_string(), "initial schema".to_string()))
        );
        assert_eq!(
            parse_filename("20240101120000_add_user_table.sql"),
            Some(("20240101120000".to_string(), "add user table".to_string()))
        );
        assert_eq!(parse_filename("README.md"), None);
        assert_eq!(parse_filename("noversion.sql"), None);
    }

    #[test]
    fn test_directory_source_orders_by_version_and_skips_other_files() {
        let dir = write_dir(&[
            ("002_second.sql", "CREATE TABLE b (id INTEGER);"),
            ("001_first.sql", "CREATE TABLE a (id INTEGER);"),
            ("notes.txt", "ignore me"),
        ]);
        let migrations = Migrator::new(MigrationSource::Directory(dir.path().to_path_buf()))
            .discover()
            .unwrap();
        let versions: Vec<_> = migrations.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "002"]);
    }

    #[test]
    fn test_failed_migration_is_recorded_and_blocks() {
        let dir = write_dir(&[
            ("001_good.sql", "CREATE TABLE a (id INTEGER);"),
            ("002_bad.sql", "CREATE TABLE b (id INTEGER); THIS IS NOT SQL;"),
            ("003_later.sql", "CREATE TABLE c (id INTEGER);"),
        ]);
        let conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(MigrationSource::Directory(dir.path().to_path_buf()));

        let err = migrator.migrate(&conn).unwrap_err();
        assert!(matches!(err, CoordinationError::MigrationFailed { ref version, .. } if version == "002"));

        // 001 stays applied, 002 rolled back, 003 never attempted
        let tables = table_names(&conn);
        assert!(tables.contains(&"a".to_string()));
        assert!(!tables.contains(&"b".to_string()));
        assert!(!tables.contains(&"c".to_string()));

        let ledger = migrator.ledger(&conn).unwrap();
        assert_eq!(ledger.len(), 2);
        assert!(ledger[0].success);
        assert!(!ledger[1].success);
        assert!(ledger[1].error_message.is_some());

        // Next run refuses until the operator intervenes
        let err = migrator.migrate(&conn).unwrap_err();
        assert!(matches!(err, CoordinationError::MigrationPreviouslyFailed(ref v) if v == "002"));

        let status = migrator.status(&conn).unwrap();
        assert_eq!(status.applied, 1);
        assert_eq!(status.failed.len(), 1);
    }

    #[test]
    fn test_retry_clears_failed_entry() {
        let dir = write_dir(&[("001_bad.sql", "NOT SQL;")]);
        let conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(MigrationSource::Directory(dir.path().to_path_buf()));
        assert!(migrator.migrate(&conn).is_err());

        fs::write(dir.path().join("001_bad.sql"), "CREATE TABLE fixed (id INTEGER);").unwrap();
        assert!(migrator.retry(&conn, "001").unwrap());
        assert!(!migrator.retry(&conn, "001").unwrap());

        assert_eq!(migrator.migrate(&conn).unwrap(), vec!["001".to_string()]);
        assert!(table_names(&conn).contains(&"fixed".to_string()));
    }

    #[test]
    fn test_checksum_mismatch_is_reported() {
        let dir = write_dir(&[("001_first.sql", "CREATE TABLE a (id INTEGER);")]);
        let conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(MigrationSource::Directory(dir.path().to_path_buf()));
        migrator.migrate(&conn).unwrap();

        fs::write(
            dir.path().join("001_first.sql"),
            "CREATE TABLE a (id INTEGER, name TEXT);",
        )
        .unwrap();

        let err = migrator.migrate(&conn).unwrap_err();
        assert!(matches!(err, CoordinationError::ChecksumMismatch { ref version, .. } if version == "001"));

        let status = migrator.status(&conn).unwrap();
        assert_eq!(status.mismatches.len(), 1);
        assert_eq!(status.mismatches[0].actual, checksum("CREATE TABLE a (id INTEGER, name TEXT);"));
    }

    #[test]
    fn test_status_lists_pending() {
        let dir = write_dir(&[("001_first.sql", "CREATE TABLE a (id INTEGER);")]);
        let conn = Connection::open_in_memory().unwrap();
        let migrator = Migrator::new(MigrationSource::Directory(dir.path().to_path_buf()));
        migrator.migrate(&conn).unwrap();

        fs::write(dir.path().join("002_add_b.sql"), "CREATE TABLE b (id INTEGER);").unwrap();
        let status = migrator.status(&conn).unwrap();
        assert_eq!(status.total, 2);
        assert_eq!(status.applied, 1);
        assert_eq!(status.pending, 1);
        assert_eq!(status.pending_migrations[0].description, "add b");
    }

    #[test]
    fn test_create_migration_scaffold() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();

        let path = create_migration(dir.path(), "Add Agent-Index", now).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "20240305140709_add_agent_index.sql"
        );

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("-- Migration: Add Agent-Index\n-- Version: 20240305140709\n"));
        assert!(content.contains("-- Up migration"));
        assert!(content.contains("-- Down migration (not supported in SQLite)"));

        // The scaffold is picked up as a pending migration
        let found = Migrator::new(MigrationSource::Directory(dir.path().to_path_buf()))
            .discover()
            .unwrap();
        assert_eq!(found[0].version, "20240305140709");
        assert_eq!(found[0].description, "add agent index");
    }

    #[test]
    fn test_create_migration_rejects_empty_name() {
        let dir = tempfile::tempdir().unwrap();
        assert!(create_migration(dir.path(), "  ", Utc::now()).is_err());
    }

    #[test]
    fn test_resolve_falls_back_to_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(MigrationSource::resolve(&missing), MigrationSource::Embedded);
        assert_eq!(
            MigrationSource::resolve(dir.path()),
            MigrationSource::Overlay(dir.path().to_path_buf())
        );
    }

    #[test]
    fn test_overlay_keeps_embedded_schema_under_new_scaffold() {
        let dir = tempfile::tempdir().unwrap();
        create_migration(dir.path(), "add index", Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()).unwrap();

        let migrator = Migrator::new(MigrationSource::resolve(dir.path()));
        let conn = Connection::open_in_memory().unwrap();
        let applied = migrator.migrate(&conn).unwrap();
        assert_eq!(applied, vec!["001", "002", "20240305140709"]);
        assert!(table_names(&conn).contains(&"workflow_mappings".to_string()));
    }

    #[test]
    fn test_overlay_directory_file_replaces_embedded_version() {
        let dir = write_dir(&[("002_custom_indexes.sql", "CREATE TABLE custom (id INTEGER);")]);
        let found = Migrator::new(MigrationSource::Overlay(dir.path().to_path_buf()))
            .discover()
            .unwrap();
        let versions: Vec<_> = found.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "002"]);
        assert_eq!(found[1].description, "custom indexes");
    }
}

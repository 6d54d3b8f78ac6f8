//! SQLite persistence for import jobs, artifacts and galleries.
//!
//! Every statement goes through one `Mutex<Connection>`, which is what makes
//! the conditional counter updates in [`job_repo`] linearizable.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};

pub mod artifact_repo;
pub mod error;
pub mod gallery_repo;
pub mod job_repo;
pub mod migrations;

pub use error::DatabaseError;

/// Shared handle to the import database. Clones share the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the database file, creating parent directories, and migrates
    /// it to the latest schema. File databases run in WAL mode so status
    /// polls do not wait on conversion workers.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self::prepare(conn)?;
        log::info!("Import database ready at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self, DatabaseError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let guard = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&guard)
    }

    /// Runs `f` in a transaction that commits only when `f` succeeds.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut guard = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = guard.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// `<data dir>/galleria/galleria.db`, e.g. `~/.local/share/galleria/galleria.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("galleria").join("galleria.db"))
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt(format!("invalid timestamp '{}': {}", raw, e)))
}

pub(crate) fn parse_optional_timestamp(
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_database_is_created_and_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("galleria.db");
        let db = Database::open(&path).unwrap();

        let version = db
            .with_conn(|conn| migrations::applied_version(conn))
            .unwrap();
        assert_eq!(version, migrations::latest_version());
        assert!(path.exists());
    }

    #[test]
    fn test_reopening_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("galleria.db");
        drop(Database::open(&path).unwrap());
        let db = Database::open(&path).unwrap();
        assert_eq!(
            db.with_conn(|conn| migrations::applied_version(conn)).unwrap(),
            migrations::latest_version()
        );
    }

    #[test]
    fn test_failed_transaction_leaves_no_rows() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), DatabaseError> = db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO galleries (id, name, course_id, assignment_id, course_name,
                 assignment_name, created_by, created_at, updated_at)
                 VALUES ('g', 'n', 'c', 'a', 'cn', 'an', 'u', 't', 't')",
                [],
            )?;
            Err(DatabaseError::Corrupt("abort".to_string()))
        });
        assert!(matches!(result, Err(DatabaseError::Corrupt(_))));

        let rows: u32 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM galleries", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let db = Database::open_in_memory().unwrap();
        let orphan = db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO gallery_artworks (gallery_id, artifact_id, position, added_at)
                 VALUES ('missing', 'a', 0, 't')",
                [],
            )?;
            Ok(())
        });
        assert!(orphan.is_err());
    }

    #[test]
    fn test_default_database_path_names_the_app() {
        if let Some(path) = default_database_path() {
            assert!(path.ends_with("galleria/galleria.db"));
        }
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let now = Utc::now();
        assert_eq!(parse_timestamp(&format_timestamp(&now)).unwrap(), now);
        assert!(parse_timestamp("yesterday").is_err());
        assert!(parse_optional_timestamp(None).unwrap().is_none());
    }
}

//! Schema versions. Each entry runs once, in its own transaction, and is
//! recorded in `_schema_versions`.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

/// `(version, name, sql)`, ascending by version.
const SCHEMA: &[(u32, &str, &str)] = &[
    (1, "galleries", include_str!("sql/001_create_galleries.sql")),
    (2, "import_jobs", include_str!("sql/002_create_import_jobs.sql")),
    (3, "artifacts", include_str!("sql/003_create_artifacts.sql")),
];

/// Highest schema version this build knows about.
pub fn latest_version() -> u32 {
    SCHEMA.last().map(|(version, _, _)| *version).unwrap_or(0)
}

/// Brings the schema up to [`latest_version`].
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;

    let applied = applied_version(conn)?;
    for &(version, name, sql) in SCHEMA.iter().filter(|(v, _, _)| *v > applied) {
        apply(conn, version, name, sql).map_err(|e| DatabaseError::Migration {
            version,
            reason: e.to_string(),
        })?;
        log::info!("Applied schema v{} ({})", version, name);
    }
    Ok(())
}

pub fn applied_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _schema_versions",
        [],
        |r| r.get(0),
    )?)
}

fn apply(conn: &Connection, version: u32, name: &str, sql: &str) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO _schema_versions (version, name) VALUES (?1, ?2)",
        params![version, name],
    )?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |r| r.get::<_, String>(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();

        assert_eq!(applied_version(&conn).unwrap(), latest_version());
        let tables = tables(&conn);
        for expected in [
            "artifacts",
            "galleries",
            "gallery_artworks",
            "import_jobs",
            "job_errors",
            "job_units",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
        }
    }

    #[test]
    fn test_rerun_applies_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let rows: u32 = conn
            .query_row("SELECT COUNT(*) FROM _schema_versions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, SCHEMA.len() as u32);
    }
}

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the job/artifact/gallery store.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema migration {version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// The `images` column of an artifact could not be encoded or decoded.
    #[error("Image list column: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("Connection mutex poisoned by a panicking writer")]
    LockPoisoned,
}

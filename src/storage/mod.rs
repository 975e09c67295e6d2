//! SQLite persistence layer.
//!
//! # Responsibilities
//! - Own the database connection handle
//! - Verify legacy databases are upgradable before anything else runs
//! - Apply versioned schema migrations
//!
//! # Design Decisions
//! - Single connection guarded by a mutex; all call sites hold it briefly
//! - WAL journal mode for concurrent readers
//! - Migrations are embedded in the binary and applied transactionally

pub mod check;
pub mod migrations;

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use thiserror::Error;

/// Errors surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },

    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("legacy schema version {found} is older than the oldest upgradable version {required}; upgrade with a previous release first")]
    LegacyTooOld { found: i64, required: i64 },

    #[error("database has migration {name:?} applied, which this binary does not know; refusing to run against a newer schema")]
    AheadOfBinary { name: String },
}

/// Timestamp format used for columns that participate in SQL
/// comparisons. UTC, second precision; lexicographic order matches
/// chronological order.
pub(crate) fn now_ts() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`; cloning shares the underlying
/// connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file.
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|source| StorageError::Open {
            path: db_path.display().to_string(),
            source,
        })?;

        Self::configure(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database. Test use only.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=10000;
            ",
        )?;
        Ok(())
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/dir/test.sqlite");
        let _db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn open_fails_on_unusable_path() {
        let temp_dir = TempDir::new().unwrap();
        // A directory where the database file should be.
        let db_path = temp_dir.path().join("occupied");
        std::fs::create_dir(&db_path).unwrap();
        assert!(matches!(
            Database::open(&db_path),
            Err(StorageError::Open { .. })
        ));
    }
}

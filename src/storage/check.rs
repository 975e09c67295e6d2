//! Pre-migration storage readiness check.
//!
//! Databases created by the legacy release line recorded their schema
//! version in a `settings` table. The migration runner only knows how to
//! take over from the final legacy version, so anything older must be
//! upgraded with a previous release before this binary will start.

use crate::storage::{Database, StorageError};

/// Final schema version of the legacy release line. Legacy databases must
/// be at exactly this version (or newer, already under the migration
/// runner) before startup may proceed.
pub const REQUIRED_LEGACY_VERSION: i64 = 33;

/// Verify the database is reachable and not stuck on an old legacy schema.
pub fn check_storage(db: &Database) -> Result<(), StorageError> {
    let conn = db.conn();

    // Reachability probe; any failure here is fatal before network
    // resources are touched.
    conn.query_row("SELECT 1", [], |_| Ok(()))?;

    let has_settings: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'settings')",
        [],
        |row| row.get(0),
    )?;
    if !has_settings {
        tracing::info!("No legacy schema marker found, treating database as current");
        return Ok(());
    }

    let version: Option<i64> = conn
        .query_row(
            "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'db_schema_version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    match version {
        None => {
            tracing::info!("Settings table carries no schema version, treating database as current");
            Ok(())
        }
        Some(found) if found < REQUIRED_LEGACY_VERSION => Err(StorageError::LegacyTooOld {
            found,
            required: REQUIRED_LEGACY_VERSION,
        }),
        Some(found) => {
            tracing::info!(
                version = found,
                "Legacy schema is upgradable, handing over to the migration runner"
            );
            Ok(())
        }
    }
}

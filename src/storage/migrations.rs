//! Versioned schema migrations.
//!
//! Migrations are embedded in the binary as ordered SQL batches, applied
//! transactionally, and recorded by name in the `migrations` table.
//! Running against a database that has a migration this binary does not
//! know is refused rather than guessed at.

use std::collections::HashSet;

use chrono::Utc;

use crate::storage::{Database, StorageError};

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_core",
        sql: "
            CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE
            );
            CREATE TABLE lists (
                id INTEGER PRIMARY KEY,
                cid TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL
            );
            CREATE TABLE subscribers (
                id INTEGER PRIMARY KEY,
                list_id INTEGER NOT NULL REFERENCES lists(id),
                cid TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'subscribed',
                bounce_count INTEGER NOT NULL DEFAULT 0,
                subscribed_at TEXT NOT NULL,
                unsubscribed_at TEXT
            );
            CREATE INDEX idx_subscribers_list ON subscribers(list_id, status);
        ",
    },
    Migration {
        name: "0002_campaigns",
        sql: "
            CREATE TABLE campaigns (
                id INTEGER PRIMARY KEY,
                cid TEXT NOT NULL UNIQUE,
                list_id INTEGER NOT NULL REFERENCES lists(id),
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                scheduled_at TEXT
            );
            CREATE TABLE queued_messages (
                id INTEGER PRIMARY KEY,
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
                subscriber_id INTEGER NOT NULL REFERENCES subscribers(id),
                status TEXT NOT NULL DEFAULT 'queued',
                mta_queue_id TEXT UNIQUE,
                created_at TEXT NOT NULL,
                sent_at TEXT
            );
            CREATE INDEX idx_queued_messages_status ON queued_messages(status);
        ",
    },
    Migration {
        name: "0003_sharing",
        sql: "
            CREATE TABLE shares (
                entity_type TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL REFERENCES users(id),
                role TEXT NOT NULL,
                PRIMARY KEY (entity_type, entity_id, user_id)
            );
            CREATE TABLE generated_role_names (
                entity_type TEXT NOT NULL,
                role_id TEXT NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (entity_type, role_id)
            );
            CREATE TABLE permission_cache (
                entity_type TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                operation TEXT NOT NULL,
                PRIMARY KEY (entity_type, entity_id, user_id, operation)
            );
        ",
    },
    Migration {
        name: "0004_services",
        sql: "
            CREATE TABLE imports (
                id INTEGER PRIMARY KEY,
                list_id INTEGER NOT NULL REFERENCES lists(id),
                path TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                processed_rows INTEGER NOT NULL DEFAULT 0,
                failed_rows INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                finished_at TEXT
            );
            CREATE TABLE feeds (
                id INTEGER PRIMARY KEY,
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
                url TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                next_check_at TEXT,
                last_checked_at TEXT,
                last_status TEXT
            );
            CREATE TABLE triggers (
                id INTEGER PRIMARY KEY,
                list_id INTEGER NOT NULL REFERENCES lists(id),
                campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
                name TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                delay_seconds INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE trigger_sends (
                trigger_id INTEGER NOT NULL REFERENCES triggers(id),
                subscriber_id INTEGER NOT NULL REFERENCES subscribers(id),
                created_at TEXT NOT NULL,
                PRIMARY KEY (trigger_id, subscriber_id)
            );
            CREATE TABLE reports (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                params TEXT,
                output TEXT,
                created_at TEXT NOT NULL,
                finished_at TEXT
            );
            CREATE TABLE timezones (
                name TEXT PRIMARY KEY,
                utc_offset_minutes INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
        ",
    },
];

/// Apply all pending migrations, returning how many ran.
pub fn latest(db: &Database) -> Result<usize, StorageError> {
    let mut conn = db.conn();

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;

    let applied: HashSet<String> = {
        let mut stmt = conn.prepare("SELECT name FROM migrations")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        names.collect::<Result<_, _>>()?
    };

    for name in &applied {
        if !MIGRATIONS.iter().any(|m| m.name == name.as_str()) {
            return Err(StorageError::AheadOfBinary { name: name.clone() });
        }
    }

    let mut count = 0;
    for migration in MIGRATIONS {
        if applied.contains(migration.name) {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO migrations (name, applied_at) VALUES (?1, ?2)",
            rusqlite::params![migration.name, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;

        tracing::info!(migration = migration.name, "Applied migration");
        count += 1;
    }

    if count == 0 {
        tracing::debug!("Schema is up to date");
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_applies_all_migrations() {
        let db = Database::open_in_memory().unwrap();
        let applied = latest(&db).unwrap();
        assert_eq!(applied, MIGRATIONS.len());

        // Spot-check the schema landed.
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM queued_messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn rerun_applies_nothing() {
        let db = Database::open_in_memory().unwrap();
        latest(&db).unwrap();
        assert_eq!(latest(&db).unwrap(), 0);
    }

    #[test]
    fn unknown_applied_migration_is_refused() {
        let db = Database::open_in_memory().unwrap();
        latest(&db).unwrap();
        db.conn()
            .execute(
                "INSERT INTO migrations (name, applied_at) VALUES ('9999_future', '2030-01-01')",
                [],
            )
            .unwrap();
        assert!(matches!(
            latest(&db),
            Err(StorageError::AheadOfBinary { .. })
        ));
    }
}

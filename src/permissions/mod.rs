//! Derived authorization state.
//!
//! Role definitions live in configuration; who holds which role on which
//! entity lives in the `shares` table. Both derived artifacts — the
//! role-name table and the flattened permission cache — are recomputed
//! from scratch at every boot, after migrations, so config edits take
//! effect without manual intervention.

use crate::config::RolesConfig;
use crate::storage::{Database, StorageError};

/// Rebuild `generated_role_names` from the configured role definitions.
///
/// Idempotent: the table always ends up exactly mirroring the config.
pub fn regenerate_role_names_table(
    db: &Database,
    roles: &RolesConfig,
) -> Result<(), StorageError> {
    let mut conn = db.conn();
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM generated_role_names", [])?;
    for (entity_type, role_id, role) in roles.iter_all() {
        tx.execute(
            "INSERT INTO generated_role_names (entity_type, role_id, name) VALUES (?1, ?2, ?3)",
            rusqlite::params![entity_type, role_id, role.name],
        )?;
    }

    tx.commit()?;
    tracing::info!("Regenerated role names table");
    Ok(())
}

/// Recompute `permission_cache` from `shares` joined against the
/// configured role definitions.
///
/// Shares referencing a role the config no longer defines contribute no
/// rows; their stale cache entries are removed by the rebuild.
pub fn rebuild_permissions(db: &Database, roles: &RolesConfig) -> Result<(), StorageError> {
    let mut conn = db.conn();
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM permission_cache", [])?;

    let shares: Vec<(String, i64, i64, String)> = {
        let mut stmt =
            tx.prepare("SELECT entity_type, entity_id, user_id, role FROM shares")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        rows.collect::<Result<_, _>>()?
    };

    let mut inserted = 0usize;
    for (entity_type, entity_id, user_id, role_id) in &shares {
        let Some(role) = roles.lookup(entity_type, role_id) else {
            tracing::warn!(
                entity_type = %entity_type,
                role = %role_id,
                "Share references an unknown role, skipping"
            );
            continue;
        };

        for operation in &role.permissions {
            tx.execute(
                "INSERT OR IGNORE INTO permission_cache
                     (entity_type, entity_id, user_id, operation)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![entity_type, entity_id, user_id, operation],
            )?;
            inserted += 1;
        }
    }

    tx.commit()?;
    tracing::info!(shares = shares.len(), permissions = inserted, "Rebuilt permission cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RolesConfig;
    use crate::storage::migrations;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        migrations::latest(&db).unwrap();
        {
            let conn = db.conn();
            conn.execute("INSERT INTO users (id, username) VALUES (1, 'alice')", [])
                .unwrap();
            conn.execute("INSERT INTO lists (id, cid, name) VALUES (7, 'l1', 'News')", [])
                .unwrap();
            conn.execute(
                "INSERT INTO shares (entity_type, entity_id, user_id, role)
                 VALUES ('list', 7, 1, 'full')",
                [],
            )
            .unwrap();
        }
        db
    }

    fn cache_rows(db: &Database) -> Vec<(String, i64, i64, String)> {
        let conn = db.conn();
        let mut stmt = conn
            .prepare(
                "SELECT entity_type, entity_id, user_id, operation
                 FROM permission_cache ORDER BY operation",
            )
            .unwrap();
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .unwrap();
        rows.collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn role_names_mirror_config() {
        let db = seeded_db();
        let roles = RolesConfig::default();
        regenerate_role_names_table(&db, &roles).unwrap();

        let name: String = db
            .conn()
            .query_row(
                "SELECT name FROM generated_role_names
                 WHERE entity_type = 'global' AND role_id = 'master'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(name, "Master");
    }

    #[test]
    fn permissions_expand_shares_by_role() {
        let db = seeded_db();
        let roles = RolesConfig::default();
        rebuild_permissions(&db, &roles).unwrap();

        let rows = cache_rows(&db);
        let expected = roles.list.get("full").unwrap().permissions.len();
        assert_eq!(rows.len(), expected);
        assert!(rows
            .iter()
            .all(|(entity_type, entity_id, user_id, _)| entity_type == "list"
                && *entity_id == 7
                && *user_id == 1));
    }

    #[test]
    fn rebuild_is_idempotent() {
        let db = seeded_db();
        let roles = RolesConfig::default();
        rebuild_permissions(&db, &roles).unwrap();
        let first = cache_rows(&db);
        rebuild_permissions(&db, &roles).unwrap();
        assert_eq!(first, cache_rows(&db));
    }

    #[test]
    fn unknown_role_contributes_nothing() {
        let db = seeded_db();
        db.conn()
            .execute(
                "UPDATE shares SET role = 'retired' WHERE entity_id = 7",
                [],
            )
            .unwrap();
        rebuild_permissions(&db, &RolesConfig::default()).unwrap();
        assert!(cache_rows(&db).is_empty());
    }
}

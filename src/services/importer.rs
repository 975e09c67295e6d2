//! Subscription importer.
//!
//! Operators queue an import by row in the `imports` table pointing at
//! an address file on disk (one address per line). The importer claims
//! jobs one at a time and turns rows into subscribers. Crash recovery
//! happens during the spawn handshake: jobs left `running` by a
//! previous run go back to `queued`.

use std::path::Path;

use tokio::time;
use uuid::Uuid;

use crate::services::{storage_err, ServiceContext, ServiceError};
use crate::storage::{now_ts, StorageError};

const NAME: &str = "importer";

/// Recover interrupted jobs and launch the polling loop.
pub async fn spawn(ctx: &ServiceContext) -> Result<(), ServiceError> {
    let reset = ctx
        .db
        .conn()
        .execute(
            "UPDATE imports SET status = 'queued' WHERE status = 'running'",
            [],
        )
        .map_err(storage_err(NAME))?;
    if reset > 0 {
        tracing::warn!(reset, "Requeued imports interrupted mid-run");
    }

    tokio::spawn(poll_loop(ctx.clone()));
    tracing::info!("Importer started");
    Ok(())
}

async fn poll_loop(ctx: ServiceContext) {
    let mut ticker = time::interval(time::Duration::from_secs(ctx.config.importer.interval_secs));
    let mut shutdown = ctx.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_pending(&ctx).await {
                    tracing::warn!(error = %e, "Import pass failed");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Importer exiting");
}

/// Claim and execute at most one queued import.
pub(crate) async fn run_pending(ctx: &ServiceContext) -> Result<(), StorageError> {
    let claimed: Option<(i64, i64, String)> = {
        let conn = ctx.db.conn();
        let job = conn
            .query_row(
                "SELECT id, list_id, path FROM imports WHERE status = 'queued' ORDER BY id LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        if let Some((id, _, _)) = job {
            conn.execute("UPDATE imports SET status = 'running' WHERE id = ?1", [id])?;
        }
        job
    };

    let Some((id, list_id, path)) = claimed else {
        return Ok(());
    };
    tracing::info!(import = id, path = %path, "Running import");

    match tokio::fs::read_to_string(Path::new(&path)).await {
        Ok(content) => {
            let (processed, failed) = import_rows(ctx, list_id, &content)?;
            ctx.db.conn().execute(
                "UPDATE imports SET status = 'finished', processed_rows = ?1,
                     failed_rows = ?2, finished_at = ?3 WHERE id = ?4",
                rusqlite::params![processed as i64, failed as i64, now_ts(), id],
            )?;
            tracing::info!(import = id, processed, failed, "Import finished");
        }
        Err(e) => {
            tracing::warn!(import = id, error = %e, "Import source unreadable");
            ctx.db.conn().execute(
                "UPDATE imports SET status = 'failed', finished_at = ?1 WHERE id = ?2",
                rusqlite::params![now_ts(), id],
            )?;
        }
    }

    Ok(())
}

fn import_rows(
    ctx: &ServiceContext,
    list_id: i64,
    content: &str,
) -> Result<(usize, usize), StorageError> {
    let mut conn = ctx.db.conn();
    let tx = conn.transaction()?;

    let mut processed = 0usize;
    let mut failed = 0usize;
    for line in content.lines() {
        let email = line.trim();
        if email.is_empty() {
            continue;
        }
        if !email.contains('@') {
            failed += 1;
            continue;
        }

        tx.execute(
            "INSERT INTO subscribers (list_id, cid, email, status, subscribed_at)
             VALUES (?1, ?2, ?3, 'subscribed', ?4)",
            rusqlite::params![list_id, Uuid::new_v4().to_string(), email, now_ts()],
        )?;
        processed += 1;
    }

    tx.commit()?;
    Ok((processed, failed))
}

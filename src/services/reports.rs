//! Report processor.
//!
//! Reports are requested as rows in the `reports` table and generated on
//! the task executor, since generation can chew through the whole
//! message history. Initialization requeues reports a previous run left
//! mid-generation; the startup chain waits on it, and readiness is not
//! signaled until it completes.

use serde_json::json;
use tokio::time;

use crate::services::executor::{ExecutorHandle, Job};
use crate::services::{storage_err, ServiceContext, ServiceError};
use crate::storage::{now_ts, Database, StorageError};

const NAME: &str = "reports";

/// Recover interrupted reports and launch the dispatch loop.
pub async fn init(ctx: &ServiceContext, executor: ExecutorHandle) -> Result<(), ServiceError> {
    let requeued = ctx
        .db
        .conn()
        .execute(
            "UPDATE reports SET state = 'pending' WHERE state = 'generating'",
            [],
        )
        .map_err(storage_err(NAME))?;
    if requeued > 0 {
        tracing::warn!(requeued, "Requeued reports interrupted mid-generation");
    }

    tokio::spawn(dispatch_loop(ctx.clone(), executor));
    tracing::info!("Report processor initialized");
    Ok(())
}

async fn dispatch_loop(ctx: ServiceContext, executor: ExecutorHandle) {
    let mut ticker = time::interval(time::Duration::from_secs(ctx.config.reports.interval_secs));
    let mut shutdown = ctx.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match claim_pending(&ctx.db) {
                    Ok(Some((id, name))) => {
                        let db = ctx.db.clone();
                        let job = Job {
                            name: format!("report-{}", id),
                            run: Box::new(move || {
                                if let Err(e) = generate(&db, id) {
                                    tracing::warn!(report = id, error = %e, "Report generation failed");
                                }
                            }),
                        };
                        tracing::debug!(report = id, name = %name, "Dispatching report");
                        if executor.submit(job).await.is_err() {
                            tracing::debug!("Executor closed, report dispatch exiting");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Report claim failed"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Report dispatch loop exiting");
}

fn claim_pending(db: &Database) -> Result<Option<(i64, String)>, StorageError> {
    let conn = db.conn();
    let pending = conn
        .query_row(
            "SELECT id, name FROM reports WHERE state = 'pending' ORDER BY id LIMIT 1",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    if let Some((id, _)) = pending {
        conn.execute("UPDATE reports SET state = 'generating' WHERE id = ?1", [id])?;
    }
    Ok(pending)
}

/// Produce the report output: aggregate message-flow counts.
pub(crate) fn generate(db: &Database, report_id: i64) -> Result<(), StorageError> {
    let conn = db.conn();

    let subscribers: i64 =
        conn.query_row("SELECT COUNT(*) FROM subscribers", [], |r| r.get(0))?;
    let sent: i64 = conn.query_row(
        "SELECT COUNT(*) FROM queued_messages WHERE status = 'sent'",
        [],
        |r| r.get(0),
    )?;
    let bounced: i64 = conn.query_row(
        "SELECT COUNT(*) FROM queued_messages WHERE status = 'bounced'",
        [],
        |r| r.get(0),
    )?;

    let output = json!({
        "subscribers": subscribers,
        "sent": sent,
        "bounced": bounced,
    });

    conn.execute(
        "UPDATE reports SET state = 'finished', output = ?1, finished_at = ?2 WHERE id = ?3",
        rusqlite::params![output.to_string(), now_ts(), report_id],
    )?;
    tracing::info!(report = report_id, "Report finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{executor, test_context};

    #[tokio::test]
    async fn init_requeues_interrupted_reports() {
        let ctx = test_context();
        ctx.db
            .conn()
            .execute(
                "INSERT INTO reports (id, name, state, created_at)
                 VALUES (1, 'monthly', 'generating', ?1)",
                [now_ts()],
            )
            .unwrap();

        let handle = executor::spawn(&ctx).await.unwrap();
        init(&ctx, handle).await.unwrap();

        // The dispatch loop may already be regenerating it; interrupted
        // state must be gone either way.
        let state: String = ctx
            .db
            .conn()
            .query_row("SELECT state FROM reports WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_ne!(state, "generating_stale");
        assert!(["pending", "generating", "finished"].contains(&state.as_str()));
    }

    #[test]
    fn generation_records_aggregates() {
        let ctx = test_context();
        ctx.db
            .conn()
            .execute(
                "INSERT INTO reports (id, name, state, created_at)
                 VALUES (7, 'totals', 'generating', ?1)",
                [now_ts()],
            )
            .unwrap();

        generate(&ctx.db, 7).unwrap();

        let (state, output): (String, String) = ctx
            .db
            .conn()
            .query_row(
                "SELECT state, output FROM reports WHERE id = 7",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(state, "finished");
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["subscribers"], 0);
    }
}

//! Automation trigger evaluator.
//!
//! A trigger fires its campaign at subscribers some delay after they
//! subscribed. Each (trigger, subscriber) pair fires at most once,
//! recorded in `trigger_sends`. Fire-and-forget: evaluation feeds the
//! message queue but nothing downstream waits on it.

use tokio::time;

use crate::observability::metrics;
use crate::services::ServiceContext;
use crate::storage::{now_ts, StorageError};

/// Launch the evaluation loop.
pub fn start(ctx: &ServiceContext) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let mut ticker =
            time::interval(time::Duration::from_secs(ctx.config.triggers.interval_secs));
        let mut shutdown = ctx.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match evaluate_due(&ctx) {
                        Ok(0) => {}
                        Ok(fired) => tracing::info!(fired, "Triggers fired"),
                        Err(e) => tracing::warn!(error = %e, "Trigger evaluation failed"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Trigger evaluator exiting");
    });
    tracing::info!("Trigger evaluator started");
}

/// Evaluate every enabled trigger once; returns how many messages fired.
pub(crate) fn evaluate_due(ctx: &ServiceContext) -> Result<usize, StorageError> {
    let triggers: Vec<(i64, i64, i64, i64)> = {
        let conn = ctx.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, list_id, campaign_id, delay_seconds FROM triggers WHERE enabled = 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        rows.collect::<Result<_, _>>()?
    };

    let mut fired = 0usize;
    for (trigger_id, list_id, campaign_id, delay_seconds) in triggers {
        fired += fire_trigger(ctx, trigger_id, list_id, campaign_id, delay_seconds)?;
    }

    if fired > 0 {
        metrics::record_messages_queued(fired as u64);
    }
    Ok(fired)
}

fn fire_trigger(
    ctx: &ServiceContext,
    trigger_id: i64,
    list_id: i64,
    campaign_id: i64,
    delay_seconds: i64,
) -> Result<usize, StorageError> {
    let mut conn = ctx.db.conn();
    let tx = conn.transaction()?;
    let now = now_ts();

    let eligible: Vec<i64> = {
        let mut stmt = tx.prepare(
            "SELECT s.id FROM subscribers s
             WHERE s.list_id = ?1 AND s.status = 'subscribed'
               AND s.subscribed_at <= datetime(?2, '-' || ?3 || ' seconds')
               AND NOT EXISTS (
                   SELECT 1 FROM trigger_sends ts
                   WHERE ts.trigger_id = ?4 AND ts.subscriber_id = s.id
               )",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![list_id, now, delay_seconds, trigger_id],
            |row| row.get(0),
        )?;
        rows.collect::<Result<_, _>>()?
    };

    for subscriber_id in &eligible {
        tx.execute(
            "INSERT INTO queued_messages (campaign_id, subscriber_id, status, created_at)
             VALUES (?1, ?2, 'queued', ?3)",
            rusqlite::params![campaign_id, subscriber_id, now],
        )?;
        tx.execute(
            "INSERT INTO trigger_sends (trigger_id, subscriber_id, created_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![trigger_id, subscriber_id, now],
        )?;
    }

    tx.commit()?;
    Ok(eligible.len())
}

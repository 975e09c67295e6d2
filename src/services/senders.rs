//! Campaign sender pool.
//!
//! Workers claim campaigns whose send time has arrived and expand them
//! into per-subscriber rows in `queued_messages`, which the transport
//! then drains. Trigger evaluation and retention cleanup start only
//! after this pool is up, since both feed the same queue.

use rand::Rng;
use tokio::time;

use crate::observability::metrics;
use crate::services::{storage_err, ServiceContext, ServiceError};
use crate::storage::{now_ts, StorageError};

const NAME: &str = "senders";

/// Recover interrupted campaigns and launch the worker pool.
pub async fn spawn(ctx: &ServiceContext) -> Result<(), ServiceError> {
    let reset = ctx
        .db
        .conn()
        .execute(
            "UPDATE campaigns SET status = 'scheduled' WHERE status = 'sending'",
            [],
        )
        .map_err(storage_err(NAME))?;
    if reset > 0 {
        tracing::warn!(reset, "Rescheduled campaigns interrupted mid-send");
    }

    let workers = ctx.config.senders.workers;
    for worker in 0..workers {
        tokio::spawn(worker_loop(worker, ctx.clone()));
    }

    tracing::info!(workers, "Sender pool started");
    Ok(())
}

async fn worker_loop(worker: usize, ctx: ServiceContext) {
    // Stagger workers so they do not all hit the campaign table at once.
    let jitter = rand::thread_rng().gen_range(0..=500u64);
    time::sleep(time::Duration::from_millis(jitter)).await;

    let mut ticker = time::interval(time::Duration::from_secs(
        ctx.config.senders.poll_interval_secs,
    ));
    let mut shutdown = ctx.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match expand_due(&ctx) {
                    Ok(Some(queued)) => tracing::info!(worker, queued, "Expanded campaign"),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(worker, error = %e, "Campaign expansion failed"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!(worker, "Sender worker exiting");
}

/// Claim one due campaign and expand it into queued messages. Returns
/// the number of messages queued, or None when nothing was due.
pub(crate) fn expand_due(ctx: &ServiceContext) -> Result<Option<usize>, StorageError> {
    let mut conn = ctx.db.conn();
    let tx = conn.transaction()?;

    let due: Option<i64> = tx
        .query_row(
            "SELECT id FROM campaigns
             WHERE status = 'scheduled' AND (scheduled_at IS NULL OR scheduled_at <= ?1)
             ORDER BY id LIMIT 1",
            [now_ts()],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|err| match err {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let Some(campaign_id) = due else {
        tx.commit()?;
        return Ok(None);
    };

    // Guard against another worker having claimed it between the select
    // and here.
    let claimed = tx.execute(
        "UPDATE campaigns SET status = 'sending' WHERE id = ?1 AND status = 'scheduled'",
        [campaign_id],
    )?;
    if claimed == 0 {
        tx.commit()?;
        return Ok(None);
    }

    let queued = tx.execute(
        "INSERT INTO queued_messages (campaign_id, subscriber_id, status, created_at)
         SELECT ?1, id, 'queued', ?2 FROM subscribers
         WHERE list_id = (SELECT list_id FROM campaigns WHERE id = ?1)
           AND status = 'subscribed'",
        rusqlite::params![campaign_id, now_ts()],
    )?;

    tx.execute(
        "UPDATE campaigns SET status = 'sent' WHERE id = ?1",
        [campaign_id],
    )?;
    tx.commit()?;

    metrics::record_messages_queued(queued as u64);
    Ok(Some(queued))
}

//! Data-retention cleanup.
//!
//! Unsubscribed addresses and their message history are kept for a
//! configured window, then purged. Fire-and-forget: runs on its own
//! schedule for the lifetime of the process.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time;

use crate::services::ServiceContext;
use crate::storage::StorageError;

/// Launch the cleanup loop.
pub fn start(ctx: &ServiceContext) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let mut ticker =
            time::interval(time::Duration::from_secs(ctx.config.retention.interval_secs));
        let mut shutdown = ctx.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match cleanup_pass(&ctx) {
                        Ok(0) => {}
                        Ok(purged) => tracing::info!(purged, "Purged expired subscriber data"),
                        Err(e) => tracing::warn!(error = %e, "Retention pass failed"),
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Retention cleanup exiting");
    });
    tracing::info!("Retention cleanup started");
}

/// The purge boundary: anything unsubscribed before this instant goes.
pub(crate) fn cutoff(now: DateTime<Utc>, window_days: i64) -> String {
    (now - ChronoDuration::days(window_days))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Delete expired subscribers and their dependent rows. Returns the
/// number of subscribers purged.
pub(crate) fn cleanup_pass(ctx: &ServiceContext) -> Result<usize, StorageError> {
    let boundary = cutoff(Utc::now(), ctx.config.retention.window_days);
    let mut conn = ctx.db.conn();
    let tx = conn.transaction()?;

    tx.execute(
        "DELETE FROM queued_messages WHERE subscriber_id IN (
             SELECT id FROM subscribers
             WHERE status = 'unsubscribed' AND unsubscribed_at < ?1)",
        [&boundary],
    )?;
    tx.execute(
        "DELETE FROM trigger_sends WHERE subscriber_id IN (
             SELECT id FROM subscribers
             WHERE status = 'unsubscribed' AND unsubscribed_at < ?1)",
        [&boundary],
    )?;
    let purged = tx.execute(
        "DELETE FROM subscribers
         WHERE status = 'unsubscribed' AND unsubscribed_at < ?1",
        [&boundary],
    )?;

    tx.commit()?;
    Ok(purged)
}

//! Timezone offset refresher.
//!
//! Scheduled sends are computed against the server's UTC offset, which
//! moves twice a year under DST. This keeps the stored offset current
//! for the lifetime of the process. Fire-and-forget: nothing downstream
//! waits on it.

use chrono::{Local, Offset};
use tokio::time;

use crate::services::ServiceContext;
use crate::storage::{now_ts, Database, StorageError};

/// Launch the refresh loop. The first pass runs immediately.
pub fn start(ctx: &ServiceContext) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let mut ticker =
            time::interval(time::Duration::from_secs(ctx.config.tz_refresh.interval_secs));
        let mut shutdown = ctx.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = refresh(&ctx.db) {
                        tracing::warn!(error = %e, "Timezone refresh failed");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Timezone refresher exiting");
    });
    tracing::info!("Timezone refresher started");
}

pub(crate) fn refresh(db: &Database) -> Result<(), StorageError> {
    let offset_minutes = Local::now().offset().fix().local_minus_utc() / 60;
    db.conn().execute(
        "REPLACE INTO timezones (name, utc_offset_minutes, updated_at) VALUES ('server-local', ?1, ?2)",
        rusqlite::params![offset_minutes, now_ts()],
    )?;
    tracing::debug!(offset_minutes, "Refreshed server timezone offset");
    Ok(())
}

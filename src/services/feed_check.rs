//! RSS campaign feed checker.
//!
//! Campaigns backed by a feed register a row in `feeds`; this service
//! periodically fetches each feed that is due and records the outcome.
//! Fetch results drive campaign generation elsewhere; here only the
//! check bookkeeping (status, next due time) is maintained.

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use tokio::time;
use url::Url;

use crate::services::{ServiceContext, ServiceError};
use crate::storage::{now_ts, StorageError};

const NAME: &str = "feed-check";

/// Build the HTTP client and launch the scan loop.
pub async fn spawn(ctx: &ServiceContext) -> Result<(), ServiceError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(
            ctx.config.feed_check.fetch_timeout_secs,
        ))
        .user_agent("mailweave-feedcheck")
        .build()
        .map_err(|e| ServiceError::Init {
            service: NAME,
            reason: e.to_string(),
        })?;

    tokio::spawn(scan_loop(ctx.clone(), client));
    tracing::info!("Feed checker started");
    Ok(())
}

async fn scan_loop(ctx: ServiceContext, client: reqwest::Client) {
    // Stagger the first pass so several instances sharing a database do
    // not fetch in lockstep.
    let jitter = rand::thread_rng().gen_range(0..=5_000u64);
    time::sleep(time::Duration::from_millis(jitter)).await;

    let mut ticker = time::interval(time::Duration::from_secs(
        ctx.config.feed_check.interval_secs,
    ));
    let mut shutdown = ctx.shutdown.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = check_due(&ctx, &client).await {
                    tracing::warn!(error = %e, "Feed scan failed");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Feed checker exiting");
}

async fn check_due(ctx: &ServiceContext, client: &reqwest::Client) -> Result<(), StorageError> {
    let due: Vec<(i64, String)> = {
        let conn = ctx.db.conn();
        let mut stmt = conn.prepare(
            "SELECT id, url FROM feeds
             WHERE status = 'active' AND (next_check_at IS NULL OR next_check_at <= ?1)",
        )?;
        let rows = stmt.query_map([now_ts()], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>()?
    };

    for (id, feed_url) in due {
        let outcome = match Url::parse(&feed_url) {
            Ok(parsed) => fetch_status(client, parsed).await,
            Err(e) => {
                tracing::warn!(feed = id, url = %feed_url, error = %e, "Feed URL is invalid");
                "invalid-url".to_string()
            }
        };
        record_check(ctx, id, &outcome)?;
        tracing::debug!(feed = id, outcome = %outcome, "Checked feed");
    }

    Ok(())
}

async fn fetch_status(client: &reqwest::Client, url: Url) -> String {
    match client.get(url).send().await {
        Ok(response) => response.status().as_u16().to_string(),
        Err(e) if e.is_timeout() => "timeout".to_string(),
        Err(_) => "unreachable".to_string(),
    }
}

pub(crate) fn record_check(
    ctx: &ServiceContext,
    feed_id: i64,
    outcome: &str,
) -> Result<(), StorageError> {
    let next = (Utc::now() + ChronoDuration::seconds(ctx.config.feed_check.interval_secs as i64))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    ctx.db.conn().execute(
        "UPDATE feeds SET last_checked_at = ?1, last_status = ?2, next_check_at = ?3
         WHERE id = ?4",
        rusqlite::params![now_ts(), outcome, next, feed_id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_context;

    #[test]
    fn check_bookkeeping_advances_the_due_time() {
        let ctx = test_context();
        {
            let conn = ctx.db.conn();
            conn.execute("INSERT INTO lists (id, cid, name) VALUES (1, 'l1', 'News')", [])
                .unwrap();
            conn.execute(
                "INSERT INTO campaigns (id, cid, list_id, name) VALUES (1, 'c1', 1, 'Feed issue')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO feeds (id, campaign_id, url) VALUES (1, 1, 'http://example.com/rss')",
                [],
            )
            .unwrap();
        }

        record_check(&ctx, 1, "200").unwrap();

        let (status, next): (String, String) = ctx
            .db
            .conn()
            .query_row(
                "SELECT last_status, next_check_at FROM feeds WHERE id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "200");
        assert!(next > now_ts());
    }
}

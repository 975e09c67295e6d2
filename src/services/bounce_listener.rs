//! MTA bounce-report line listener.
//!
//! A local MTA reports delivery outcomes over a plain TCP line protocol:
//! one `<queue-id> <disposition>` pair per line. Queue ids were assigned
//! when the transport claimed the message, so reports map straight back
//! to `queued_messages`.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::observability::metrics;
use crate::services::{ServiceContext, ServiceError};
use crate::storage::{Database, StorageError};

const NAME: &str = "bounce-listener";

/// Delivery outcome reported by the MTA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Delivered,
    Bounced,
    Deferred,
}

/// Bind the report socket and launch the accept loop. Disabled
/// listeners complete the handshake immediately.
pub async fn spawn(ctx: &ServiceContext) -> Result<(), ServiceError> {
    let cfg = &ctx.config.bounce_listener;
    if !cfg.enabled {
        tracing::info!("Bounce listener disabled");
        return Ok(());
    }

    let listener = TcpListener::bind((cfg.host.as_str(), cfg.port))
        .await
        .map_err(|source| ServiceError::Bind {
            service: NAME,
            host: cfg.host.clone(),
            port: cfg.port,
            source,
        })?;

    let local_addr = listener.local_addr().map_err(|source| ServiceError::Bind {
        service: NAME,
        host: cfg.host.clone(),
        port: cfg.port,
        source,
    })?;
    tracing::info!(address = %local_addr, "Bounce listener listening");

    tokio::spawn(accept_loop(listener, ctx.db.clone(), ctx.shutdown.subscribe()));
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    db: Database,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "Bounce report connection opened");
                    let db = db.clone();
                    tokio::spawn(read_reports(stream, db));
                }
                Err(e) => tracing::warn!(error = %e, "Bounce listener accept failed"),
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Bounce listener accept loop exiting");
}

async fn read_reports(stream: TcpStream, db: Database) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some((queue_id, disposition)) = parse_report_line(&line) else {
                    tracing::debug!(line = %line, "Ignoring malformed bounce report");
                    continue;
                };
                if let Err(e) = apply_report(&db, &queue_id, disposition) {
                    tracing::warn!(error = %e, "Failed to apply bounce report");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Bounce report connection ended abruptly");
                break;
            }
        }
    }
}

/// Parse a `<queue-id> <disposition>` report line.
pub(crate) fn parse_report_line(line: &str) -> Option<(String, Disposition)> {
    let mut parts = line.split_whitespace();
    let queue_id = parts.next()?;
    let disposition = match parts.next()? {
        "sent" | "delivered" => Disposition::Delivered,
        "bounced" => Disposition::Bounced,
        "deferred" => Disposition::Deferred,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((queue_id.to_string(), disposition))
}

pub(crate) fn apply_report(
    db: &Database,
    queue_id: &str,
    disposition: Disposition,
) -> Result<(), StorageError> {
    // Delivered is the transport's default assumption; deferred is the
    // MTA's own retry business.
    if disposition != Disposition::Bounced {
        return Ok(());
    }

    let conn = db.conn();
    conn.execute(
        "UPDATE subscribers SET bounce_count = bounce_count + 1
         WHERE id = (SELECT subscriber_id FROM queued_messages WHERE mta_queue_id = ?1)",
        [queue_id],
    )?;
    let updated = conn.execute(
        "UPDATE queued_messages SET status = 'bounced' WHERE mta_queue_id = ?1",
        [queue_id],
    )?;

    if updated > 0 {
        tracing::info!(queue_id = %queue_id, "Recorded MTA bounce");
        metrics::record_bounce("mta-report");
    } else {
        tracing::debug!(queue_id = %queue_id, "Bounce report for unknown queue id");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_context;
    use crate::storage::now_ts;

    #[test]
    fn report_lines_parse() {
        assert_eq!(
            parse_report_line("q-123 bounced"),
            Some(("q-123".to_string(), Disposition::Bounced))
        );
        assert_eq!(
            parse_report_line("q-123 sent"),
            Some(("q-123".to_string(), Disposition::Delivered))
        );
        assert_eq!(
            parse_report_line("  q-9   deferred  "),
            Some(("q-9".to_string(), Disposition::Deferred))
        );
        assert_eq!(parse_report_line("q-123"), None);
        assert_eq!(parse_report_line("q-123 exploded"), None);
        assert_eq!(parse_report_line("q-123 bounced extra"), None);
    }

    #[test]
    fn bounced_report_updates_message_and_subscriber() {
        let ctx = test_context();
        {
            let conn = ctx.db.conn();
            conn.execute("INSERT INTO lists (id, cid, name) VALUES (1, 'l1', 'News')", [])
                .unwrap();
            conn.execute(
                "INSERT INTO subscribers (id, list_id, cid, email, subscribed_at)
                 VALUES (1, 1, 's1', 'a@example.com', ?1)",
                [now_ts()],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO campaigns (id, cid, list_id, name) VALUES (1, 'c1', 1, 'Issue')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO queued_messages (campaign_id, subscriber_id, status, mta_queue_id, created_at)
                 VALUES (1, 1, 'sent', 'q-1', ?1)",
                [now_ts()],
            )
            .unwrap();
        }

        apply_report(&ctx.db, "q-1", Disposition::Bounced).unwrap();

        let conn = ctx.db.conn();
        let (status, bounce_count): (String, i64) = conn
            .query_row(
                "SELECT m.status, s.bounce_count FROM queued_messages m
                 JOIN subscribers s ON s.id = m.subscriber_id LIMIT 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "bounced");
        assert_eq!(bounce_count, 1);
    }

    #[test]
    fn delivered_report_changes_nothing() {
        let ctx = test_context();
        apply_report(&ctx.db, "q-unknown", Disposition::Delivered).unwrap();
    }
}

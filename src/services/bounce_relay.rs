//! VERP return-path SMTP relay.
//!
//! Remote MTAs that cannot deliver a campaign message bounce it back to
//! its VERP return path, which encodes the campaign and subscriber:
//! `bounce.<campaign-cid>.<subscriber-cid>@<hostname>`. This relay
//! accepts those bounces and records them against the subscriber.

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::observability::metrics;
use crate::services::smtp;
use crate::services::{ServiceContext, ServiceError};
use crate::storage::{Database, StorageError};

const NAME: &str = "bounce-relay";

/// Bind the relay socket and launch the accept loop. Disabled relays
/// complete the handshake immediately.
pub async fn spawn(ctx: &ServiceContext) -> Result<(), ServiceError> {
    let cfg = &ctx.config.bounce_relay;
    if !cfg.enabled {
        tracing::info!("Bounce relay disabled");
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
    tracing::info!(address = %local_addr, "Bounce relay listening");

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
                    tracing::debug!(peer = %peer, "Bounce relay session opened");
                    let db = db.clone();
                    tokio::spawn(async move {
                        let result = smtp::run_session(stream, "mailweave-verp", |envelope| {
                            for recipient in &envelope.recipients {
                                handle_bounce_recipient(&db, recipient);
                            }
                        })
                        .await;
                        if let Err(e) = result {
                            tracing::debug!(error = %e, "Bounce relay session ended abruptly");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Bounce relay accept failed"),
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Bounce relay accept loop exiting");
}

fn handle_bounce_recipient(db: &Database, recipient: &str) {
    let Some((campaign_cid, subscriber_cid)) = parse_verp_recipient(recipient) else {
        tracing::debug!(recipient = %recipient, "Ignoring non-VERP recipient");
        return;
    };

    match record_bounce(db, &campaign_cid, &subscriber_cid) {
        Ok(true) => {
            tracing::info!(
                campaign = %campaign_cid,
                subscriber = %subscriber_cid,
                "Recorded bounce"
            );
            metrics::record_bounce("verp");
        }
        Ok(false) => tracing::debug!(
            campaign = %campaign_cid,
            subscriber = %subscriber_cid,
            "Bounce for unknown subscriber"
        ),
        Err(e) => tracing::warn!(error = %e, "Failed to record bounce"),
    }
}

/// Parse a VERP return-path local part of the form
/// `bounce.<campaign-cid>.<subscriber-cid>`.
pub(crate) fn parse_verp_recipient(addr: &str) -> Option<(String, String)> {
    let (local, _domain) = addr.split_once('@')?;
    let mut parts = local.splitn(3, '.');
    if parts.next()? != "bounce" {
        return None;
    }
    let campaign = parts.next()?;
    let subscriber = parts.next()?;
    if campaign.is_empty() || subscriber.is_empty() {
        return None;
    }
    Some((campaign.to_string(), subscriber.to_string()))
}

/// Record a bounce against the subscriber and its queued message.
/// Returns whether the subscriber was known.
fn record_bounce(
    db: &Database,
    campaign_cid: &str,
    subscriber_cid: &str,
) -> Result<bool, StorageError> {
    let conn = db.conn();

    let updated = conn.execute(
        "UPDATE subscribers SET bounce_count = bounce_count + 1 WHERE cid = ?1",
        [subscriber_cid],
    )?;
    if updated == 0 {
        return Ok(false);
    }

    conn.execute(
        "UPDATE queued_messages SET status = 'bounced'
         WHERE campaign_id = (SELECT id FROM campaigns WHERE cid = ?1)
           AND subscriber_id = (SELECT id FROM subscribers WHERE cid = ?2)
           AND status IN ('queued', 'sending', 'sent')",
        [campaign_cid, subscriber_cid],
    )?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_context;
    use crate::storage::now_ts;

    #[test]
    fn verp_addresses_parse() {
        assert_eq!(
            parse_verp_recipient("bounce.camp1.sub1@mail.example.com"),
            Some(("camp1".to_string(), "sub1".to_string()))
        );
        assert_eq!(parse_verp_recipient("newsletter@example.com"), None);
        assert_eq!(parse_verp_recipient("bounce.only@example.com"), None);
        assert_eq!(parse_verp_recipient("bounce..sub@example.com"), None);
        assert_eq!(parse_verp_recipient("no-at-sign"), None);
    }

    #[test]
    fn bounce_updates_subscriber_and_message() {
        let ctx = test_context();
        {
            let conn = ctx.db.conn();
            conn.execute("INSERT INTO lists (id, cid, name) VALUES (1, 'l1', 'News')", [])
                .unwrap();
            conn.execute(
                "INSERT INTO subscribers (id, list_id, cid, email, subscribed_at)
                 VALUES (1, 1, 'sub1', 'a@example.com', ?1)",
                [now_ts()],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO campaigns (id, cid, list_id, name) VALUES (1, 'camp1', 1, 'Issue 1')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO queued_messages (campaign_id, subscriber_id, status, created_at)
                 VALUES (1, 1, 'sent', ?1)",
                [now_ts()],
            )
            .unwrap();
        }

        assert!(record_bounce(&ctx.db, "camp1", "sub1").unwrap());

        let conn = ctx.db.conn();
        let bounce_count: i64 = conn
            .query_row("SELECT bounce_count FROM subscribers WHERE cid = 'sub1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(bounce_count, 1);

        let status: String = conn
            .query_row("SELECT status FROM queued_messages LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "bounced");
    }

    #[test]
    fn unknown_subscriber_is_reported() {
        let ctx = test_context();
        assert!(!record_bounce(&ctx.db, "campX", "subX").unwrap());
    }
}

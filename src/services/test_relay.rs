//! Mock SMTP endpoint for campaign test sends.
//!
//! When enabled, campaign authors can point a test send at this relay
//! and see it accepted without anything leaving the machine. Messages
//! are counted and discarded.

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::observability::metrics;
use crate::services::smtp;
use crate::services::{ServiceContext, ServiceError};

const NAME: &str = "test-relay";

/// Bind the relay socket and launch the accept loop. Disabled relays
/// complete the handshake immediately.
pub async fn spawn(ctx: &ServiceContext) -> Result<(), ServiceError> {
    let cfg = &ctx.config.test_relay;
    if !cfg.enabled {
        tracing::info!("Test relay disabled");
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
    tracing::info!(address = %local_addr, "Test relay listening");

    tokio::spawn(accept_loop(listener, ctx.shutdown.subscribe()));
    Ok(())
}

async fn accept_loop(listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "Test relay session opened");
                    tokio::spawn(async move {
                        let result = smtp::run_session(stream, "mailweave-test", |envelope| {
                            tracing::info!(
                                recipients = envelope.recipients.len(),
                                lines = envelope.data_lines,
                                "Test message accepted"
                            );
                            metrics::record_test_message();
                        })
                        .await;
                        if let Err(e) = result {
                            tracing::debug!(error = %e, "Test relay session ended abruptly");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Test relay accept failed"),
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Test relay accept loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    use crate::services::test_context;

    #[tokio::test]
    async fn accepts_a_message_over_the_wire() {
        let ctx = test_context();

        // Drive the session against a listener bound the same way the
        // service binds its own, so the test controls the port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(accept_loop(listener, ctx.shutdown.subscribe()));

        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        assert!(lines.next_line().await.unwrap().unwrap().starts_with("220"));
        write_half.write_all(b"EHLO test\r\n").await.unwrap();
        assert!(lines.next_line().await.unwrap().unwrap().starts_with("250"));
        write_half
            .write_all(b"MAIL FROM:<campaign@example.com>\r\n")
            .await
            .unwrap();
        lines.next_line().await.unwrap();
        write_half
            .write_all(b"RCPT TO:<someone@example.com>\r\n")
            .await
            .unwrap();
        lines.next_line().await.unwrap();
        write_half.write_all(b"DATA\r\n").await.unwrap();
        assert!(lines.next_line().await.unwrap().unwrap().starts_with("354"));
        write_half
            .write_all(b"Subject: hi\r\n\r\nbody\r\n.\r\n")
            .await
            .unwrap();
        assert!(lines.next_line().await.unwrap().unwrap().starts_with("250"));
        write_half.write_all(b"QUIT\r\n").await.unwrap();
    }
}

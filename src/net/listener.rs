//! Tier listener binding.
//!
//! # Responsibilities
//! - Bind a TCP listener for one audience tier
//! - Classify bind failures by OS cause so the caller can exit loudly
//! - Log the resolved local address on success
//!
//! # Design Decisions
//! - Permission-denied and address-in-use get friendly, named errors;
//!   anything else is an unclassified defect the caller must not suppress
//! - Binding is exclusive; a failed bind leaves nothing half-open

use std::fmt;
use std::io;

use thiserror::Error;
use tokio::net::TcpListener;

/// The address a bind was attempted on, formatted the way operators see
/// it in logs ("Port 3000").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTarget {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port {}", self.port)
    }
}

/// Error type for listener binds.
#[derive(Debug, Error)]
pub enum BindError {
    /// Privileged port bound without sufficient rights.
    #[error("{bind} requires elevated privileges")]
    PermissionDenied { bind: BindTarget },

    /// Another process already owns the port.
    #[error("{bind} is already in use")]
    AddrInUse { bind: BindTarget },

    /// Any other bind failure; an unrecoverable defect, not suppressed.
    #[error("failed to bind {bind}: {source}")]
    Other { bind: BindTarget, source: io::Error },
}

impl BindError {
    /// Whether this error carries a friendly classification (and exit
    /// code 1 semantics) rather than being an unclassified defect.
    pub fn is_classified(&self) -> bool {
        !matches!(self, BindError::Other { .. })
    }
}

/// Map an OS-level bind failure into the error taxonomy.
pub fn classify_bind_error(err: io::Error, bind: BindTarget) -> BindError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => BindError::PermissionDenied { bind },
        io::ErrorKind::AddrInUse => BindError::AddrInUse { bind },
        _ => BindError::Other { bind, source: err },
    }
}

/// Bind a listener on `host:port`, logging the resolved address.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, BindError> {
    let target = BindTarget {
        host: host.to_string(),
        port,
    };

    let listener = TcpListener::bind((host, port))
        .await
        .map_err(|err| classify_bind_error(err, target.clone()))?;

    let local_addr = listener
        .local_addr()
        .map_err(|err| classify_bind_error(err, target.clone()))?;

    tracing::info!(
        host = %target.host,
        address = %local_addr,
        "Listener bound on port {}", local_addr.port()
    );

    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(port: u16) -> BindTarget {
        BindTarget {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[test]
    fn permission_denied_is_classified_with_port() {
        let err = classify_bind_error(
            io::Error::from(io::ErrorKind::PermissionDenied),
            target(80),
        );
        assert!(err.is_classified());
        let message = err.to_string();
        assert!(message.contains("Port 80"));
        assert!(message.contains("requires elevated privileges"));
    }

    #[test]
    fn addr_in_use_is_classified_with_port() {
        let err = classify_bind_error(io::Error::from(io::ErrorKind::AddrInUse), target(3003));
        assert!(err.is_classified());
        let message = err.to_string();
        assert!(message.contains("Port 3003"));
        assert!(message.contains("already in use"));
    }

    #[test]
    fn other_kinds_stay_unclassified() {
        let err = classify_bind_error(
            io::Error::from(io::ErrorKind::AddrNotAvailable),
            target(3000),
        );
        assert!(!err.is_classified());
    }

    #[tokio::test]
    async fn bind_on_taken_port_reports_addr_in_use() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = holder.local_addr().unwrap().port();

        match bind("127.0.0.1", port).await {
            Err(BindError::AddrInUse { bind }) => assert_eq!(bind.port, port),
            other => panic!("expected AddrInUse, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn bind_on_free_port_succeeds() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}

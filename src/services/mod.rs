//! Background services.
//!
//! Every service follows one of two startup disciplines:
//!
//! - `async fn spawn(..) -> Result<.., ServiceError>` performs its
//!   initialization (socket binds, crash recovery against the queue
//!   tables) and returns only once the service is fully ready; its
//!   long-running loop is detached onto the runtime.
//! - `fn start(..)` is fire-and-forget: the loop is detached immediately
//!   and readiness of the service is not a precondition for anything
//!   downstream.
//!
//! A service that cannot initialize is fatal to process startup; retry
//! and backoff behavior inside a running service is that service's own
//! business.

pub mod bounce_listener;
pub mod bounce_relay;
pub mod executor;
pub mod feed_check;
pub mod importer;
pub mod mta;
pub mod reports;
pub mod retention;
pub mod senders;
mod smtp;
pub mod test_relay;
pub mod triggers;
pub mod tz_refresh;

use std::sync::Arc;

use thiserror::Error;

use crate::config::ServerConfig;
use crate::lifecycle::Shutdown;
use crate::storage::{Database, StorageError};

/// Everything a background service needs to run.
#[derive(Clone)]
pub struct ServiceContext {
    pub db: Database,
    pub config: Arc<ServerConfig>,
    pub shutdown: Shutdown,
}

/// Fatal service startup failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} failed to bind {host}:{port}: {source}")]
    Bind {
        service: &'static str,
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("{service} storage error: {source}")]
    Storage {
        service: &'static str,
        source: StorageError,
    },

    #[error("{service} failed to initialize: {reason}")]
    Init {
        service: &'static str,
        reason: String,
    },
}

/// Adapter from raw rusqlite errors to a service-tagged startup error.
pub(crate) fn storage_err(service: &'static str) -> impl Fn(rusqlite::Error) -> ServiceError {
    move |e| ServiceError::Storage {
        service,
        source: StorageError::from(e),
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> ServiceContext {
    use crate::storage::migrations;

    let db = Database::open_in_memory().unwrap();
    migrations::latest(&db).unwrap();
    ServiceContext {
        db,
        config: Arc::new(ServerConfig::default()),
        shutdown: Shutdown::new(),
    }
}

//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber exactly once
//! - Respect RUST_LOG when set, falling back to the configured level
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging
//! - Startup events carry structured fields, not formatted strings

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the tracing subscriber.
///
/// `default_level` is used when `RUST_LOG` is not set in the environment.
pub fn init_logging(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mailweave={},tower_http=warn", default_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

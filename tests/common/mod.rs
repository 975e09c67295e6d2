//! Shared helpers for integration tests.

use std::path::Path;

use mailweave::config::ServerConfig;

/// A config rooted in a scratch directory, bound to loopback on the
/// given tier ports, with fast service polling so tests do not idle.
pub fn test_config(root: &Path, trusted: u16, sandbox: u16, public: u16) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.www.host = "127.0.0.1".to_string();
    config.www.trusted_port = trusted;
    config.www.sandbox_port = sandbox;
    config.www.public_port = public;
    config.database.path = root.join("mailweave.sqlite");
    config.directories.files = root.join("files");
    config.directories.uploads = root.join("uploads");
    config.observability.metrics_enabled = false;
    config.mta.poll_interval_secs = 1;
    config.senders.poll_interval_secs = 1;
    config.reports.interval_secs = 1;
    config
}

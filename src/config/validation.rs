//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the three www ports are distinct
//! - Validate value ranges (intervals > 0, worker counts > 0)
//! - Check role definitions are well-formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServerConfig;

/// A single semantic validation failure.
#[derive(Debug)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `www.sandbox_port`.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn err(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Validate a loaded configuration, collecting every violation.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.www.host.is_empty() {
        errors.push(err("www.host", "host must not be empty"));
    }

    let ports = [
        ("www.trusted_port", config.www.trusted_port),
        ("www.sandbox_port", config.www.sandbox_port),
        ("www.public_port", config.www.public_port),
    ];
    for (i, (field, port)) in ports.iter().enumerate() {
        for (other_field, other_port) in ports.iter().skip(i + 1) {
            if port == other_port {
                errors.push(err(
                    field,
                    format!("port {} is also configured as {}", port, other_field),
                ));
            }
        }
    }

    if config.executor.workers == 0 {
        errors.push(err("executor.workers", "at least one worker is required"));
    }
    if config.executor.queue_depth == 0 {
        errors.push(err("executor.queue_depth", "queue depth must be positive"));
    }
    if config.senders.workers == 0 {
        errors.push(err("senders.workers", "at least one worker is required"));
    }

    let intervals = [
        ("mta.poll_interval_secs", config.mta.poll_interval_secs),
        ("tz_refresh.interval_secs", config.tz_refresh.interval_secs),
        ("importer.interval_secs", config.importer.interval_secs),
        ("feed_check.interval_secs", config.feed_check.interval_secs),
        ("senders.poll_interval_secs", config.senders.poll_interval_secs),
        ("triggers.interval_secs", config.triggers.interval_secs),
        ("retention.interval_secs", config.retention.interval_secs),
        ("reports.interval_secs", config.reports.interval_secs),
    ];
    for (field, interval) in intervals {
        if interval == 0 {
            errors.push(err(field, "interval must be positive"));
        }
    }

    if config.retention.window_days <= 0 {
        errors.push(err("retention.window_days", "window must be positive"));
    }

    if config.privileges.user.is_empty() {
        errors.push(err("privileges.user", "user must not be empty"));
    }
    if config.privileges.group.is_empty() {
        errors.push(err("privileges.group", "group must not be empty"));
    }

    for (entity_type, role_id, role) in config.roles.iter_all() {
        if role.name.is_empty() {
            errors.push(err(
                &format!("roles.{}.{}.name", entity_type, role_id),
                "role name must not be empty",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::web::AppTier;

/// Root configuration for the mailweave server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Process title, carried on the startup log.
    pub title: String,

    /// Web tier host and ports.
    pub www: WwwConfig,

    /// Database location.
    pub database: DatabaseConfig,

    /// Working directories that must exist before privileges are dropped.
    pub directories: DirectoryConfig,

    /// Unprivileged identity adopted after startup.
    pub privileges: PrivilegeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Local task executor pool.
    pub executor: ExecutorConfig,

    /// Mock SMTP endpoint for campaign test sends.
    pub test_relay: RelayConfig,

    /// VERP return-path SMTP relay.
    pub bounce_relay: RelayConfig,

    /// Built-in outbound mail transport.
    pub mta: MtaConfig,

    /// Timezone offset refresher.
    pub tz_refresh: IntervalConfig,

    /// Subscription importer.
    pub importer: IntervalConfig,

    /// RSS campaign feed checker.
    pub feed_check: FeedCheckConfig,

    /// Campaign sender worker pool.
    pub senders: SendersConfig,

    /// Automation trigger evaluator.
    pub triggers: IntervalConfig,

    /// Data-retention cleanup.
    pub retention: RetentionConfig,

    /// MTA bounce-report line listener.
    pub bounce_listener: RelayConfig,

    /// Report processor.
    pub reports: IntervalConfig,

    /// Role definitions per entity type. Derived authorization state is
    /// rebuilt from these at every boot.
    pub roles: RolesConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            title: "mailweave".to_string(),
            www: WwwConfig::default(),
            database: DatabaseConfig::default(),
            directories: DirectoryConfig::default(),
            privileges: PrivilegeConfig::default(),
            observability: ObservabilityConfig::default(),
            executor: ExecutorConfig::default(),
            test_relay: RelayConfig {
                enabled: false,
                host: "127.0.0.1".to_string(),
                port: 5587,
            },
            bounce_relay: RelayConfig {
                enabled: false,
                host: "127.0.0.1".to_string(),
                port: 2525,
            },
            mta: MtaConfig::default(),
            tz_refresh: IntervalConfig { interval_secs: 3600 },
            importer: IntervalConfig { interval_secs: 60 },
            feed_check: FeedCheckConfig::default(),
            senders: SendersConfig::default(),
            triggers: IntervalConfig { interval_secs: 60 },
            retention: RetentionConfig::default(),
            bounce_listener: RelayConfig {
                enabled: false,
                host: "127.0.0.1".to_string(),
                port: 5699,
            },
            reports: IntervalConfig { interval_secs: 30 },
            roles: RolesConfig::default(),
        }
    }
}

/// Web tier configuration: one shared host, one port per audience tier.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WwwConfig {
    /// Host all three tiers bind on.
    pub host: String,

    /// Trusted tier port (authenticated operators).
    pub trusted_port: u16,

    /// Sandboxed tier port (template previews, untrusted content).
    pub sandbox_port: u16,

    /// Public tier port (subscription pages, archives).
    pub public_port: u16,

    /// Request timeout applied to every tier, in seconds.
    pub request_timeout_secs: u64,
}

impl WwwConfig {
    /// Configured port for an audience tier.
    pub fn port(&self, tier: AppTier) -> u16 {
        match tier {
            AppTier::Trusted => self.trusted_port,
            AppTier::Sandboxed => self.sandbox_port,
            AppTier::Public => self.public_port,
        }
    }
}

impl Default for WwwConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            trusted_port: 3000,
            sandbox_port: 3003,
            public_port: 3004,
            request_timeout_secs: 30,
        }
    }
}

/// Database location.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/mailweave.sqlite"),
        }
    }
}

/// Directories created (and chowned, when running as root) during startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Campaign attachment storage.
    pub files: PathBuf,

    /// Uploaded file storage.
    pub uploads: PathBuf,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            files: PathBuf::from("data/files"),
            uploads: PathBuf::from("data/uploads"),
        }
    }
}

/// Unprivileged identity the process adopts once all privileged resources
/// are acquired.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    /// Target user name.
    pub user: String,

    /// Target group name.
    pub group: String,
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            user: "nobody".to_string(),
            group: "nogroup".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Local task executor pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Number of worker tasks.
    pub workers: usize,

    /// Depth of the pending-job queue.
    pub queue_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_depth: 64,
        }
    }
}

/// A socket-bound auxiliary service that can be switched off entirely.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Whether the service runs at all.
    pub enabled: bool,

    /// Bind host.
    pub host: String,

    /// Bind port.
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }
}

/// Built-in outbound mail transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MtaConfig {
    /// Queue polling interval in seconds.
    pub poll_interval_secs: u64,

    /// Messages claimed per polling pass.
    pub batch_size: usize,
}

impl Default for MtaConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            batch_size: 50,
        }
    }
}

/// Plain periodic-service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IntervalConfig {
    /// Seconds between passes.
    pub interval_secs: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Feed checker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeedCheckConfig {
    /// Seconds between scan passes.
    pub interval_secs: u64,

    /// Per-fetch timeout in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for FeedCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            fetch_timeout_secs: 10,
        }
    }
}

/// Sender pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SendersConfig {
    /// Number of sender workers.
    pub workers: usize,

    /// Seconds between queue polls per worker.
    pub poll_interval_secs: u64,
}

impl Default for SendersConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval_secs: 5,
        }
    }
}

/// Retention cleanup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Seconds between cleanup passes.
    pub interval_secs: u64,

    /// Days unsubscribed data is kept before purging.
    pub window_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 6 * 3600,
            window_days: 30,
        }
    }
}

/// A single role: display name plus the operations it grants.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoleConfig {
    /// Human-readable role name, materialized into the role-name table.
    pub name: String,

    /// Operations granted by this role.
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Role definitions keyed by entity type, then role id.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RolesConfig {
    pub global: HashMap<String, RoleConfig>,
    pub list: HashMap<String, RoleConfig>,
    pub campaign: HashMap<String, RoleConfig>,
    pub report: HashMap<String, RoleConfig>,
}

impl RolesConfig {
    /// Iterate all (entity type, role id, role) triples.
    pub fn iter_all(&self) -> impl Iterator<Item = (&'static str, &String, &RoleConfig)> {
        self.global
            .iter()
            .map(|(id, role)| ("global", id, role))
            .chain(self.list.iter().map(|(id, role)| ("list", id, role)))
            .chain(self.campaign.iter().map(|(id, role)| ("campaign", id, role)))
            .chain(self.report.iter().map(|(id, role)| ("report", id, role)))
    }

    /// Look up a role definition for an entity type.
    pub fn lookup(&self, entity_type: &str, role_id: &str) -> Option<&RoleConfig> {
        match entity_type {
            "global" => self.global.get(role_id),
            "list" => self.list.get(role_id),
            "campaign" => self.campaign.get(role_id),
            "report" => self.report.get(role_id),
            _ => None,
        }
    }
}

impl Default for RolesConfig {
    fn default() -> Self {
        let mut global = HashMap::new();
        global.insert(
            "master".to_string(),
            RoleConfig {
                name: "Master".to_string(),
                permissions: vec![
                    "manageUsers".to_string(),
                    "manageLists".to_string(),
                    "manageCampaigns".to_string(),
                    "viewReports".to_string(),
                ],
            },
        );

        let mut list = HashMap::new();
        list.insert(
            "full".to_string(),
            RoleConfig {
                name: "Full Access".to_string(),
                permissions: vec![
                    "view".to_string(),
                    "edit".to_string(),
                    "manageSubscribers".to_string(),
                ],
            },
        );

        let mut campaign = HashMap::new();
        campaign.insert(
            "full".to_string(),
            RoleConfig {
                name: "Full Access".to_string(),
                permissions: vec!["view".to_string(), "edit".to_string(), "send".to_string()],
            },
        );

        let mut report = HashMap::new();
        report.insert(
            "full".to_string(),
            RoleConfig {
                name: "Full Access".to_string(),
                permissions: vec!["view".to_string(), "execute".to_string()],
            },
        );

        Self {
            global,
            list,
            campaign,
            report,
        }
    }
}

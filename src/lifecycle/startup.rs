//! Startup orchestration.
//!
//! # Responsibilities
//! - Verify and migrate persistent storage before anything else runs
//! - Rebuild derived authorization state
//! - Start background services and bind the three web tiers in
//!   dependency order
//! - Drop root exactly once every privileged resource is acquired
//! - Signal readiness only after the whole chain has completed
//!
//! # Design Decisions
//! - Fail fast: any stage error is fatal, nothing is retried
//! - The order is an explicit stage list fixed at compile time; each
//!   entry's dependency constraint is spelled out on the list itself
//! - Stages run strictly one at a time; concurrency exists only inside
//!   already-started services running alongside later stages
//! - No stage has a timeout: a stuck dependency hangs startup rather
//!   than producing a half-initialized process

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::config::ServerConfig;
use crate::lifecycle::{ReadyFlag, Shutdown};
use crate::net::{self, BindError, BindTarget};
use crate::observability::metrics;
use crate::permissions;
use crate::privileges::{self, PrivilegeError};
use crate::services::executor::ExecutorHandle;
use crate::services::{self, ServiceContext, ServiceError};
use crate::storage::{check, migrations, Database, StorageError};
use crate::web::{self, AppState, AppTier};

/// One step of the startup chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    StorageCheck,
    Migrations,
    Permissions,
    Executor,
    TestRelay,
    BounceRelay,
    Mta,
    BindTrusted,
    BindSandboxed,
    BindPublic,
    EnsureDirectories,
    DropPrivileges,
    TzRefresh,
    Importer,
    FeedCheck,
    Senders,
    Triggers,
    Retention,
    BounceListener,
    Reports,
    Ready,
}

impl Stage {
    /// The fixed boot order. Each entry runs only after everything above
    /// it has settled successfully.
    pub const ORDER: [Stage; 21] = [
        // Storage must be consistent before anything reads it.
        Stage::StorageCheck,
        Stage::Migrations,
        // Derived authorization state assumes a migrated schema.
        Stage::Permissions,
        // The executor backs other services; it comes up first.
        Stage::Executor,
        // Relays and the transport may be consulted by web handlers from
        // the very first request, so they precede the binds.
        Stage::TestRelay,
        Stage::BounceRelay,
        Stage::Mta,
        // Privileged ports bind while the process still has rights.
        Stage::BindTrusted,
        Stage::BindSandboxed,
        Stage::BindPublic,
        // Directory creation may itself need elevated rights.
        Stage::EnsureDirectories,
        // Irreversible; everything after this runs unprivileged.
        Stage::DropPrivileges,
        Stage::TzRefresh,
        Stage::Importer,
        Stage::FeedCheck,
        // Senders feed the queue that triggers and cleanup depend on.
        Stage::Senders,
        Stage::Triggers,
        Stage::Retention,
        Stage::BounceListener,
        // Report initialization gates the readiness signal.
        Stage::Reports,
        Stage::Ready,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::StorageCheck => "storage-check",
            Stage::Migrations => "migrations",
            Stage::Permissions => "permissions",
            Stage::Executor => "executor",
            Stage::TestRelay => "test-relay",
            Stage::BounceRelay => "bounce-relay",
            Stage::Mta => "mta",
            Stage::BindTrusted => "bind-trusted",
            Stage::BindSandboxed => "bind-sandbox",
            Stage::BindPublic => "bind-public",
            Stage::EnsureDirectories => "ensure-directories",
            Stage::DropPrivileges => "drop-privileges",
            Stage::TzRefresh => "tz-refresh",
            Stage::Importer => "importer",
            Stage::FeedCheck => "feed-check",
            Stage::Senders => "senders",
            Stage::Triggers => "triggers",
            Stage::Retention => "retention",
            Stage::BounceListener => "bounce-listener",
            Stage::Reports => "reports",
            Stage::Ready => "ready",
        }
    }
}

/// Fatal startup failures, by stage family.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("storage check failed: {0}")]
    Storage(#[source] StorageError),

    #[error("migration failed: {0}")]
    Migration(#[source] StorageError),

    #[error("permission rebuild failed: {0}")]
    Permissions(#[source] StorageError),

    #[error("service {service} failed to start: {source}")]
    ServiceStart {
        service: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("privileged filesystem setup failed: {0}")]
    Privileges(#[from] PrivilegeError),
}

impl BootstrapError {
    /// Classified failures are logged with a friendly message and exit
    /// with code 1. An unclassified bind failure is an unrecoverable
    /// defect instead, surfaced through the default failure path.
    pub fn exits_with_code_one(&self) -> bool {
        match self {
            BootstrapError::Bind(bind) => bind.is_classified(),
            _ => true,
        }
    }
}

fn service_stage(service: &'static str) -> impl FnOnce(ServiceError) -> BootstrapError {
    move |source| BootstrapError::ServiceStart { service, source }
}

/// Drives the startup chain. Constructed once at process start; after a
/// successful [`run`](Bootstrap::run) the spawned services and listeners
/// live for the rest of the process.
pub struct Bootstrap {
    config: Arc<ServerConfig>,
    ready: ReadyFlag,
    shutdown: Shutdown,
    db: Option<Database>,
    executor: Option<ExecutorHandle>,
    bound: Vec<(AppTier, SocketAddr)>,
}

impl Bootstrap {
    pub fn new(config: Arc<ServerConfig>, ready: ReadyFlag, shutdown: Shutdown) -> Self {
        Self {
            config,
            ready,
            shutdown,
            db: None,
            executor: None,
            bound: Vec::new(),
        }
    }

    /// Run every stage in order, stopping at the first failure. The
    /// failing stage is logged here with its context; the error is
    /// returned for the caller to turn into exit behavior.
    pub async fn run(&mut self) -> Result<(), BootstrapError> {
        for stage in Stage::ORDER {
            tracing::debug!(stage = stage.name(), "Entering startup stage");
            if let Err(err) = self.run_stage(stage).await {
                tracing::error!(stage = stage.name(), error = %err, "Startup failed");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Listener addresses in the order they were bound.
    pub fn bound_addresses(&self) -> &[(AppTier, SocketAddr)] {
        &self.bound
    }

    fn database(&self) -> Database {
        self.db
            .clone()
            .expect("storage check runs before any stage that touches the database")
    }

    fn service_ctx(&self) -> ServiceContext {
        ServiceContext {
            db: self.database(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    async fn run_stage(&mut self, stage: Stage) -> Result<(), BootstrapError> {
        match stage {
            Stage::StorageCheck => {
                let db = Database::open(&self.config.database.path)
                    .map_err(BootstrapError::Storage)?;
                check::check_storage(&db).map_err(BootstrapError::Storage)?;
                self.db = Some(db);
            }
            Stage::Migrations => {
                migrations::latest(&self.database()).map_err(BootstrapError::Migration)?;
            }
            Stage::Permissions => {
                let db = self.database();
                permissions::regenerate_role_names_table(&db, &self.config.roles)
                    .map_err(BootstrapError::Permissions)?;
                permissions::rebuild_permissions(&db, &self.config.roles)
                    .map_err(BootstrapError::Permissions)?;
            }
            Stage::Executor => {
                let handle = services::executor::spawn(&self.service_ctx())
                    .await
                    .map_err(service_stage("executor"))?;
                self.executor = Some(handle);
            }
            Stage::TestRelay => {
                services::test_relay::spawn(&self.service_ctx())
                    .await
                    .map_err(service_stage("test-relay"))?;
            }
            Stage::BounceRelay => {
                services::bounce_relay::spawn(&self.service_ctx())
                    .await
                    .map_err(service_stage("bounce-relay"))?;
            }
            Stage::Mta => {
                services::mta::spawn(&self.service_ctx())
                    .await
                    .map_err(service_stage("mta"))?;
            }
            Stage::BindTrusted => self.bind_tier(AppTier::Trusted).await?,
            Stage::BindSandboxed => self.bind_tier(AppTier::Sandboxed).await?,
            Stage::BindPublic => self.bind_tier(AppTier::Public).await?,
            Stage::EnsureDirectories => {
                privileges::ensure_dir(&self.config.directories.files, &self.config.privileges)
                    .await?;
                privileges::ensure_dir(&self.config.directories.uploads, &self.config.privileges)
                    .await?;
            }
            Stage::DropPrivileges => {
                privileges::drop_root_privileges(&self.config.privileges)?;
            }
            Stage::TzRefresh => services::tz_refresh::start(&self.service_ctx()),
            Stage::Importer => {
                services::importer::spawn(&self.service_ctx())
                    .await
                    .map_err(service_stage("importer"))?;
            }
            Stage::FeedCheck => {
                services::feed_check::spawn(&self.service_ctx())
                    .await
                    .map_err(service_stage("feed-check"))?;
            }
            Stage::Senders => {
                services::senders::spawn(&self.service_ctx())
                    .await
                    .map_err(service_stage("senders"))?;
            }
            Stage::Triggers => services::triggers::start(&self.service_ctx()),
            Stage::Retention => services::retention::start(&self.service_ctx()),
            Stage::BounceListener => {
                services::bounce_listener::spawn(&self.service_ctx())
                    .await
                    .map_err(service_stage("bounce-listener"))?;
            }
            Stage::Reports => {
                let executor = self
                    .executor
                    .clone()
                    .expect("executor stage runs before report initialization");
                services::reports::init(&self.service_ctx(), executor)
                    .await
                    .map_err(service_stage("reports"))?;
            }
            Stage::Ready => {
                tracing::info!("All services started");
                self.ready.set_ready();
                metrics::record_ready();
            }
        }
        Ok(())
    }

    async fn bind_tier(&mut self, tier: AppTier) -> Result<(), BootstrapError> {
        let port = self.config.www.port(tier);
        let listener = net::bind(&self.config.www.host, port).await?;
        let local_addr = listener.local_addr().map_err(|err| {
            net::classify_bind_error(
                err,
                BindTarget {
                    host: self.config.www.host.clone(),
                    port,
                },
            )
        })?;

        let state = AppState {
            db: self.database(),
            ready: self.ready.clone(),
            tier,
        };
        let app = web::create_app(tier, state, self.config.www.request_timeout_secs);
        let shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = web::serve(listener, app, shutdown_rx).await {
                tracing::error!(tier = %tier, error = %e, "Tier server terminated");
            }
        });

        tracing::info!(tier = %tier, address = %local_addr, "WWW server listening");
        self.bound.push((tier, local_addr));
        Ok(())
    }
}

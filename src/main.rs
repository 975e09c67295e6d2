//! Mailweave — self-hosted newsletter platform server.
//!
//! One process serves three web tiers at different trust levels and a
//! set of background services (importer, feed checker, sender pool,
//! trigger evaluator, retention cleanup, bounce handling, reports),
//! brought online by a strictly ordered startup chain:
//!
//! ```text
//!   storage check ─▶ migrations ─▶ permission rebuild
//!        ─▶ executor ─▶ relays ─▶ mail transport
//!        ─▶ bind trusted ─▶ bind sandbox ─▶ bind public
//!        ─▶ ensure directories ─▶ drop root privileges
//!        ─▶ post-drop services ─▶ report processor ─▶ ready
//! ```
//!
//! Any stage failing aborts startup: classified failures (storage,
//! migration, service start, privileged-port and port-in-use binds) are
//! logged and exit with code 1; anything else surfaces through the
//! default failure path. Readiness is signaled only once the entire
//! chain has completed.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use mailweave::config::load_config;
use mailweave::lifecycle::{Bootstrap, ReadyFlag, Shutdown};
use mailweave::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "mailweave", about = "Self-hosted newsletter platform server")]
struct Args {
    /// Path to the configuration file.
    #[arg(long, default_value = "mailweave.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logging first; config loading already wants to report problems.
    logging::init_logging("info");

    let config = match load_config(&args.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            tracing::error!(path = %args.config.display(), error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        title = %config.title,
        host = %config.www.host,
        trusted_port = config.www.trusted_port,
        sandbox_port = config.www.sandbox_port,
        public_port = config.www.public_port,
        "mailweave starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let ready = ReadyFlag::new();
    let shutdown = Shutdown::new();
    let mut bootstrap = Bootstrap::new(config, ready, shutdown.clone());

    if let Err(err) = bootstrap.run().await {
        // The failing stage already logged its context.
        if err.exits_with_code_one() {
            std::process::exit(1);
        }
        return Err(err.into());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    shutdown.trigger();

    Ok(())
}

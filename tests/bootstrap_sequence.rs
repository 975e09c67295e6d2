//! End-to-end startup chain tests against real sockets and a scratch
//! database.

use std::sync::Arc;

use mailweave::lifecycle::{Bootstrap, BootstrapError, ReadyFlag, Shutdown};
use mailweave::net::BindError;
use mailweave::AppTier;

mod common;

#[tokio::test]
async fn full_startup_reaches_readiness_in_bind_order() {
    let root = tempfile::tempdir().unwrap();
    let config = common::test_config(root.path(), 38311, 38312, 38313);

    let ready = ReadyFlag::new();
    let shutdown = Shutdown::new();
    let mut bootstrap = Bootstrap::new(Arc::new(config), ready.clone(), shutdown.clone());

    assert!(!ready.is_ready());
    bootstrap.run().await.expect("startup chain failed");
    assert!(ready.is_ready());

    // Listeners bound in the fixed tier order.
    let tiers: Vec<AppTier> = bootstrap
        .bound_addresses()
        .iter()
        .map(|(tier, _)| *tier)
        .collect();
    assert_eq!(
        tiers,
        vec![AppTier::Trusted, AppTier::Sandboxed, AppTier::Public]
    );

    // Working directories were created before the privilege drop stage.
    assert!(root.path().join("files").is_dir());
    assert!(root.path().join("uploads").is_dir());

    // The readiness probe answers on every tier now that the chain is
    // complete.
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    for (_, addr) in bootstrap.bound_addresses() {
        let response = client
            .get(format!("http://{}/ready", addr))
            .send()
            .await
            .expect("tier unreachable");
        assert_eq!(response.status(), 200);
    }

    shutdown.trigger();
}

#[tokio::test]
async fn occupied_sandbox_port_aborts_startup() {
    let root = tempfile::tempdir().unwrap();
    let config = common::test_config(root.path(), 38321, 38322, 38323);

    // Squat on the sandbox port before the chain reaches it.
    let _squatter = tokio::net::TcpListener::bind("127.0.0.1:38322")
        .await
        .unwrap();

    let ready = ReadyFlag::new();
    let shutdown = Shutdown::new();
    let mut bootstrap = Bootstrap::new(Arc::new(config), ready.clone(), shutdown.clone());

    let err = bootstrap.run().await.unwrap_err();
    match &err {
        BootstrapError::Bind(BindError::AddrInUse { bind }) => {
            assert_eq!(bind.port, 38322);
            assert!(err.to_string().contains("Port 38322"));
            assert!(err.to_string().contains("already in use"));
        }
        other => panic!("expected AddrInUse, got {:?}", other),
    }
    assert!(err.exits_with_code_one());

    // Readiness never becomes true on a failed chain.
    assert!(!ready.is_ready());

    // The trusted listener bound before the failure; this core does not
    // tear it down — process exit reclaims it.
    let tiers: Vec<AppTier> = bootstrap
        .bound_addresses()
        .iter()
        .map(|(tier, _)| *tier)
        .collect();
    assert_eq!(tiers, vec![AppTier::Trusted]);

    shutdown.trigger();
}

#[tokio::test]
async fn unreachable_storage_stops_everything() {
    let root = tempfile::tempdir().unwrap();
    let mut config = common::test_config(root.path(), 38331, 38332, 38333);

    // A directory where the database file should be makes the open fail.
    config.database.path = root.path().join("occupied");
    std::fs::create_dir(&config.database.path).unwrap();

    let ready = ReadyFlag::new();
    let shutdown = Shutdown::new();
    let mut bootstrap = Bootstrap::new(Arc::new(config), ready.clone(), shutdown);

    let err = bootstrap.run().await.unwrap_err();
    assert!(matches!(err, BootstrapError::Storage(_)));
    assert!(err.exits_with_code_one());

    // Nothing downstream ran: no binds, no readiness.
    assert!(bootstrap.bound_addresses().is_empty());
    assert!(!ready.is_ready());
}

#[tokio::test]
async fn readiness_is_monotonic_across_the_whole_process() {
    let root = tempfile::tempdir().unwrap();
    let config = common::test_config(root.path(), 38341, 38342, 38343);

    let ready = ReadyFlag::new();
    let shutdown = Shutdown::new();
    let mut bootstrap = Bootstrap::new(Arc::new(config), ready.clone(), shutdown.clone());
    bootstrap.run().await.expect("startup chain failed");

    assert!(ready.is_ready());
    // Shutdown never unsets readiness; only process exit does.
    shutdown.trigger();
    assert!(ready.is_ready());
}

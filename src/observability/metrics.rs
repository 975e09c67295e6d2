//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Expose a Prometheus-compatible metrics endpoint
//! - Track message flow (queued, sent, bounced) and readiness
//!
//! # Metrics
//! - `mailweave_messages_queued_total` (counter)
//! - `mailweave_messages_sent_total` (counter)
//! - `mailweave_bounces_total` (counter, by source)
//! - `mailweave_test_messages_total` (counter)
//! - `mailweave_ready` (gauge): 1 once the startup chain has completed

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on the given address.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_messages_queued(count: u64) {
    metrics::counter!("mailweave_messages_queued_total").increment(count);
}

pub fn record_message_sent() {
    metrics::counter!("mailweave_messages_sent_total").increment(1);
}

pub fn record_bounce(source: &'static str) {
    metrics::counter!("mailweave_bounces_total", "source" => source).increment(1);
}

pub fn record_test_message() {
    metrics::counter!("mailweave_test_messages_total").increment(1);
}

pub fn record_ready() {
    metrics::gauge!("mailweave_ready").set(1.0);
}

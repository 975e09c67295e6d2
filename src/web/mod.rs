//! Per-tier web applications.
//!
//! # Responsibilities
//! - Build the axum router for each audience tier
//! - Wire up middleware (request ID, tracing, request timeout)
//! - Expose liveness and readiness probes backed by the readiness flag
//!
//! # Design Decisions
//! - Exactly one router per tier; the tier determines the trust boundary
//! - Readiness reports 503 until the startup chain completes
//! - Application routes beyond the probes are intentionally thin

pub mod request_id;

use std::fmt;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::lifecycle::ReadyFlag;
use crate::storage::Database;
use request_id::RequestIdLayer;

/// Audience tier served by a listener. Determines which application
/// handler and trust boundary the listener serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppTier {
    /// Authenticated operator UI and API.
    Trusted,
    /// Untrusted rendered content (template previews).
    Sandboxed,
    /// Subscription forms and archives.
    Public,
}

impl AppTier {
    /// The fixed bind order: trusted, then sandboxed, then public.
    pub const BIND_ORDER: [AppTier; 3] = [AppTier::Trusted, AppTier::Sandboxed, AppTier::Public];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppTier::Trusted => "trusted",
            AppTier::Sandboxed => "sandbox",
            AppTier::Public => "public",
        }
    }
}

impl fmt::Display for AppTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State injected into every tier's handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub ready: ReadyFlag,
    pub tier: AppTier,
}

/// Build the application router for one audience tier.
pub fn create_app(tier: AppTier, state: AppState, request_timeout_secs: u64) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/ready", get(ready))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout_secs)))
        .layer(RequestIdLayer)
        .layer(TraceLayer::new_for_http())
}

/// Serve one tier until the shutdown signal arrives.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

async fn index(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "service": "mailweave",
        "tier": state.tier.as_str(),
    }))
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.ready.is_ready() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "starting")
    }
}

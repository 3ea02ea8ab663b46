//! HTTP observability endpoints: health checks and Prometheus metrics.
//!
//! This is not the admin surface (search, catalog, accounts) — that lives
//! in a separate service which produces mutations through the bridge.

pub mod health;
mod metrics;

use crate::metrics::ServerMetrics;
use crate::registry::SessionRegistry;
use crate::udp::SubscriberRegistry;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;
use std::time::Instant;

pub use health::HealthStatus;

/// Everything the observability handlers read.
pub struct HttpState {
    /// Shared counters.
    pub metrics: Arc<ServerMetrics>,
    /// Session registry, for gauges.
    pub registry: Arc<SessionRegistry>,
    /// Datagram subscriber registry, for gauges.
    pub subscribers: Arc<SubscriberRegistry>,
    /// Process start, for uptime.
    pub started: Instant,
}

impl HttpState {
    /// Capture the collaborators and stamp the start time.
    pub fn new(
        metrics: Arc<ServerMetrics>,
        registry: Arc<SessionRegistry>,
        subscribers: Arc<SubscriberRegistry>,
    ) -> Self {
        Self {
            metrics,
            registry,
            subscribers,
            started: Instant::now(),
        }
    }
}

/// Build the HTTP router with all endpoints.
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(state))
}

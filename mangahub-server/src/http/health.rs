//! Health check endpoint.

use super::HttpState;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
    /// Live duplex connections.
    pub active_connections: i64,
    /// Live sessions.
    pub sessions: usize,
    /// Registered datagram endpoints.
    pub udp_subscribers: usize,
}

/// Health check handler.
pub async fn health_handler(Extension(state): Extension<Arc<HttpState>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        active_connections: state.metrics.active_connections.load(Ordering::Relaxed),
        sessions: state.registry.count(),
        udp_subscribers: state.subscribers.count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serializes() {
        let status = HealthStatus {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
            active_connections: 4,
            sessions: 3,
            udp_subscribers: 2,
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"sessions\":3"));
        assert!(json.contains("\"udp_subscribers\":2"));
    }
}

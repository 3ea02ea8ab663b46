//! Prometheus metrics endpoint.

use super::HttpState;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format. Gauges reflect current
/// state; counters are monotonic since startup.
pub async fn metrics_handler(Extension(state): Extension<Arc<HttpState>>) -> impl IntoResponse {
    let m = &state.metrics;

    let connections = m.active_connections.load(Ordering::Relaxed);
    let sessions = state.registry.count();
    let subscribers = state.subscribers.count();

    let broadcasts = m.broadcasts_total.load(Ordering::Relaxed);
    let broadcast_failures = m.broadcast_failures.load(Ordering::Relaxed);
    let datagrams_sent = m.datagrams_sent.load(Ordering::Relaxed);
    let datagram_failures = m.datagram_failures.load(Ordering::Relaxed);
    let sessions_created = m.sessions_created.load(Ordering::Relaxed);
    let stale_evictions = m.stale_evictions.load(Ordering::Relaxed);
    let frames_received = m.frames_received.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP mangahub_connections_active Live duplex connections
# TYPE mangahub_connections_active gauge
mangahub_connections_active {connections}

# HELP mangahub_sessions_active Live sessions
# TYPE mangahub_sessions_active gauge
mangahub_sessions_active {sessions}

# HELP mangahub_udp_subscribers Registered datagram endpoints
# TYPE mangahub_udp_subscribers gauge
mangahub_udp_subscribers {subscribers}

# HELP mangahub_info Server information
# TYPE mangahub_info gauge
mangahub_info{{version="{version}"}} 1

# HELP mangahub_broadcasts_total Duplex fan-out frames written
# TYPE mangahub_broadcasts_total counter
mangahub_broadcasts_total {broadcasts}

# HELP mangahub_broadcast_failures_total Duplex fan-out write failures
# TYPE mangahub_broadcast_failures_total counter
mangahub_broadcast_failures_total {broadcast_failures}

# HELP mangahub_datagrams_sent_total Notification datagrams sent
# TYPE mangahub_datagrams_sent_total counter
mangahub_datagrams_sent_total {datagrams_sent}

# HELP mangahub_datagram_failures_total Notification datagram send failures
# TYPE mangahub_datagram_failures_total counter
mangahub_datagram_failures_total {datagram_failures}

# HELP mangahub_sessions_created_total Sessions created since startup
# TYPE mangahub_sessions_created_total counter
mangahub_sessions_created_total {sessions_created}

# HELP mangahub_stale_evictions_total Sessions evicted by the liveness monitor
# TYPE mangahub_stale_evictions_total counter
mangahub_stale_evictions_total {stale_evictions}

# HELP mangahub_frames_received_total Inbound duplex frames that parsed
# TYPE mangahub_frames_received_total counter
mangahub_frames_received_total {frames_received}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

//! Operational metrics for both servers and the bridge.

use std::sync::atomic::{AtomicI64, AtomicU64};

/// Counters and gauges shared across the sync core.
///
/// Counters are monotonically increasing (reset only on restart).
/// Thread-safe via atomics, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Duplex fan-out frames written successfully.
    pub broadcasts_total: AtomicU64,
    /// Duplex fan-out frames that failed to write.
    pub broadcast_failures: AtomicU64,
    /// Live duplex connections (gauge).
    pub active_connections: AtomicI64,
    /// Notification datagrams sent successfully.
    pub datagrams_sent: AtomicU64,
    /// Notification datagrams that failed to send.
    pub datagram_failures: AtomicU64,
    /// Sessions created since startup.
    pub sessions_created: AtomicU64,
    /// Sessions evicted by the liveness monitor.
    pub stale_evictions: AtomicU64,
    /// Inbound duplex frames that parsed.
    pub frames_received: AtomicU64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn counters_start_at_zero() {
        let metrics = ServerMetrics::default();
        assert_eq!(metrics.broadcasts_total.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 0);
    }
}

//! Per-device liveness tracking and network-quality classification.
//!
//! The monitor keeps the last heartbeat and RTT sample per connection and
//! classifies a quality label from their freshness. The periodic sweeper
//! that evicts dead sessions lives on the session server, which owns the
//! transport slots being torn down.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::fmt;
use std::time::{Duration, Instant};

const FRESH_WINDOW: Duration = Duration::from_secs(15);
const STALE_WINDOW: Duration = Duration::from_secs(30);
const RTT_EXCELLENT: Duration = Duration::from_millis(50);
const RTT_GOOD: Duration = Duration::from_millis(150);
const RTT_FAIR: Duration = Duration::from_millis(400);

/// Classified link quality for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkQuality {
    /// Fresh heartbeat, RTT under 50 ms.
    Excellent,
    /// Fresh heartbeat, RTT under 150 ms.
    Good,
    /// RTT under 400 ms with a heartbeat that is not yet stale.
    Fair,
    /// Stale heartbeat or RTT at 400 ms and above.
    Poor,
    /// No samples yet.
    Unknown,
}

impl NetworkQuality {
    /// The wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkQuality::Excellent => "excellent",
            NetworkQuality::Good => "good",
            NetworkQuality::Fair => "fair",
            NetworkQuality::Poor => "poor",
            NetworkQuality::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct Pulse {
    last_beat: Instant,
    wall: DateTime<Utc>,
    last_rtt: Option<Duration>,
}

/// Tracks `client_id -> (last_heartbeat, last_rtt)`.
#[derive(Debug, Default)]
pub struct HeartbeatMonitor {
    pulses: DashMap<String, Pulse>,
}

impl HeartbeatMonitor {
    /// Record a heartbeat, optionally with a fresh RTT sample. Passing
    /// `None` keeps the previous sample.
    pub fn record(&self, client_id: &str, rtt: Option<Duration>) {
        let now = Instant::now();
        let wall = Utc::now();
        self.pulses
            .entry(client_id.to_string())
            .and_modify(|pulse| {
                pulse.last_beat = now;
                pulse.wall = wall;
                if rtt.is_some() {
                    pulse.last_rtt = rtt;
                }
            })
            .or_insert(Pulse {
                last_beat: now,
                wall,
                last_rtt: rtt,
            });
    }

    /// Forget a connection.
    pub fn remove(&self, client_id: &str) {
        self.pulses.remove(client_id);
    }

    /// Wall-clock instant of the last heartbeat.
    pub fn last_heartbeat(&self, client_id: &str) -> Option<DateTime<Utc>> {
        self.pulses.get(client_id).map(|p| p.wall)
    }

    /// Most recent RTT sample.
    pub fn rtt(&self, client_id: &str) -> Option<Duration> {
        self.pulses.get(client_id).and_then(|p| p.last_rtt)
    }

    /// Classify link quality from heartbeat freshness and RTT.
    pub fn quality(&self, client_id: &str) -> NetworkQuality {
        match self.pulses.get(client_id) {
            Some(pulse) => classify(pulse.last_beat.elapsed(), pulse.last_rtt),
            None => NetworkQuality::Unknown,
        }
    }

    /// Connections whose last heartbeat is older than `timeout`.
    pub fn stale_clients(&self, timeout: Duration) -> Vec<String> {
        self.pulses
            .iter()
            .filter(|entry| entry.value().last_beat.elapsed() > timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Tracked connection count.
    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    /// Whether no connections are tracked.
    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }
}

fn classify(age: Duration, rtt: Option<Duration>) -> NetworkQuality {
    let Some(rtt) = rtt else {
        return NetworkQuality::Unknown;
    };

    if age >= STALE_WINDOW || rtt >= RTT_FAIR {
        return NetworkQuality::Poor;
    }

    if age < FRESH_WINDOW {
        if rtt < RTT_EXCELLENT {
            NetworkQuality::Excellent
        } else if rtt < RTT_GOOD {
            NetworkQuality::Good
        } else {
            NetworkQuality::Fair
        }
    } else {
        // Heartbeat between the fresh and stale windows: degraded.
        NetworkQuality::Fair
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn secs(v: u64) -> Duration {
        Duration::from_secs(v)
    }

    #[test]
    fn classifier_follows_the_table() {
        assert_eq!(classify(secs(1), Some(ms(10))), NetworkQuality::Excellent);
        assert_eq!(classify(secs(1), Some(ms(49))), NetworkQuality::Excellent);
        assert_eq!(classify(secs(1), Some(ms(50))), NetworkQuality::Good);
        assert_eq!(classify(secs(1), Some(ms(149))), NetworkQuality::Good);
        assert_eq!(classify(secs(1), Some(ms(150))), NetworkQuality::Fair);
        assert_eq!(classify(secs(1), Some(ms(399))), NetworkQuality::Fair);
        assert_eq!(classify(secs(1), Some(ms(400))), NetworkQuality::Poor);
        assert_eq!(classify(secs(31), Some(ms(10))), NetworkQuality::Poor);
        assert_eq!(classify(secs(20), Some(ms(10))), NetworkQuality::Fair);
        assert_eq!(classify(secs(1), None), NetworkQuality::Unknown);
    }

    #[test]
    fn unknown_client_is_unknown_quality() {
        let monitor = HeartbeatMonitor::default();
        assert_eq!(monitor.quality("nobody"), NetworkQuality::Unknown);
        assert!(monitor.last_heartbeat("nobody").is_none());
        assert!(monitor.rtt("nobody").is_none());
    }

    #[test]
    fn record_keeps_previous_rtt_when_none() {
        let monitor = HeartbeatMonitor::default();
        monitor.record("c1", Some(ms(20)));
        monitor.record("c1", None);
        assert_eq!(monitor.rtt("c1"), Some(ms(20)));

        monitor.record("c1", Some(ms(80)));
        assert_eq!(monitor.rtt("c1"), Some(ms(80)));
    }

    #[test]
    fn fresh_fast_connection_is_excellent() {
        let monitor = HeartbeatMonitor::default();
        monitor.record("c1", Some(ms(5)));
        assert_eq!(monitor.quality("c1"), NetworkQuality::Excellent);
    }

    #[test]
    fn stale_clients_respects_timeout() {
        let monitor = HeartbeatMonitor::default();
        monitor.record("c1", Some(Duration::ZERO));

        assert!(monitor.stale_clients(secs(60)).is_empty());
        assert_eq!(monitor.stale_clients(Duration::ZERO).len(), 1);
    }

    #[test]
    fn remove_forgets_the_connection() {
        let monitor = HeartbeatMonitor::default();
        monitor.record("c1", Some(ms(5)));
        assert_eq!(monitor.len(), 1);

        monitor.remove("c1");
        assert!(monitor.is_empty());
        assert_eq!(monitor.quality("c1"), NetworkQuality::Unknown);
    }

    #[test]
    fn quality_labels() {
        assert_eq!(NetworkQuality::Excellent.as_str(), "excellent");
        assert_eq!(NetworkQuality::Unknown.to_string(), "unknown");
    }
}

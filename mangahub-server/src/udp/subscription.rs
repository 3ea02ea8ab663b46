//! Datagram subscriber registry: endpoint <-> user bookkeeping with
//! TTL-based eviction.

use crate::config::DatagramConfig;
use chrono::{DateTime, Utc};
use mangahub_types::messages::DG_EVENT_ALL;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::interval;

/// A `(user_id, addr)` registration on the notification channel.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Owning user.
    pub user_id: String,
    /// The datagram peer address, the registry key.
    pub addr: SocketAddr,
    /// Event-type filter; `all` admits everything.
    pub event_types: Vec<String>,
    /// When the endpoint registered.
    pub registered_at: DateTime<Utc>,
    /// Last packet seen from this endpoint; bounds its lifetime.
    pub last_seen: Instant,
}

impl Endpoint {
    fn admits(&self, event_type: &str) -> bool {
        self.event_types
            .iter()
            .any(|t| t == DG_EVENT_ALL || t == event_type)
    }
}

#[derive(Debug, Default)]
struct Inner {
    by_user: HashMap<String, Vec<Endpoint>>,
    addr_to_user: HashMap<SocketAddr, String>,
}

/// Thread-safe owner of all [`Endpoint`] records.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    inner: RwLock<Inner>,
}

impl SubscriberRegistry {
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an endpoint. A previous registration of the same address
    /// is replaced so `addr -> user` stays consistent with the per-user
    /// lists.
    pub fn subscribe(&self, user_id: &str, addr: SocketAddr, event_types: Vec<String>) {
        let mut inner = self.write();
        remove_endpoint(&mut inner, addr);

        inner.by_user.entry(user_id.to_string()).or_default().push(Endpoint {
            user_id: user_id.to_string(),
            addr,
            event_types,
            registered_at: Utc::now(),
            last_seen: Instant::now(),
        });
        inner.addr_to_user.insert(addr, user_id.to_string());

        tracing::debug!(user_id, addr = %addr, "subscriber registered");
    }

    /// Replace an endpoint's filter. Returns false when the address is not
    /// registered. Also refreshes `last_seen`.
    pub fn update_filter(&self, addr: SocketAddr, event_types: Vec<String>) -> bool {
        let mut inner = self.write();
        let Some(user_id) = inner.addr_to_user.get(&addr).cloned() else {
            return false;
        };
        let Some(endpoints) = inner.by_user.get_mut(&user_id) else {
            return false;
        };
        match endpoints.iter_mut().find(|e| e.addr == addr) {
            Some(endpoint) => {
                endpoint.event_types = event_types;
                endpoint.last_seen = Instant::now();
                tracing::debug!(user_id, addr = %addr, "subscription updated");
                true
            }
            None => false,
        }
    }

    /// Refresh an endpoint's `last_seen`. Returns false when unknown.
    pub fn heartbeat(&self, addr: SocketAddr) -> bool {
        let mut inner = self.write();
        let Some(user_id) = inner.addr_to_user.get(&addr).cloned() else {
            return false;
        };
        let Some(endpoints) = inner.by_user.get_mut(&user_id) else {
            return false;
        };
        match endpoints.iter_mut().find(|e| e.addr == addr) {
            Some(endpoint) => {
                endpoint.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Drop an endpoint. Returns the user it belonged to.
    pub fn unsubscribe(&self, addr: SocketAddr) -> Option<String> {
        let mut inner = self.write();
        let user_id = remove_endpoint(&mut inner, addr)?;
        tracing::debug!(user_id = %user_id, addr = %addr, "subscriber unregistered");
        Some(user_id)
    }

    /// The user an address is registered to.
    pub fn user_for(&self, addr: SocketAddr) -> Option<String> {
        self.read().addr_to_user.get(&addr).cloned()
    }

    /// Snapshot of the user's endpoints whose filter admits `event_type`.
    pub fn subscribers_for(&self, user_id: &str, event_type: &str) -> Vec<Endpoint> {
        let inner = self.read();
        inner
            .by_user
            .get(user_id)
            .map(|endpoints| {
                endpoints
                    .iter()
                    .filter(|e| e.admits(event_type))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total registered endpoints.
    pub fn count(&self) -> usize {
        self.read().by_user.values().map(Vec::len).sum()
    }

    /// Drop every endpoint whose `last_seen` is older than `ttl`.
    /// Returns the removed `(user_id, addr)` pairs.
    pub fn sweep_stale(&self, ttl: Duration) -> Vec<(String, SocketAddr)> {
        let mut inner = self.write();
        let mut removed = Vec::new();

        inner.by_user.retain(|user_id, endpoints| {
            endpoints.retain(|endpoint| {
                if endpoint.last_seen.elapsed() <= ttl {
                    true
                } else {
                    removed.push((user_id.clone(), endpoint.addr));
                    false
                }
            });
            !endpoints.is_empty()
        });

        for (_, addr) in &removed {
            inner.addr_to_user.remove(addr);
        }
        removed
    }
}

fn remove_endpoint(inner: &mut Inner, addr: SocketAddr) -> Option<String> {
    let user_id = inner.addr_to_user.remove(&addr)?;
    if let Some(endpoints) = inner.by_user.get_mut(&user_id) {
        endpoints.retain(|e| e.addr != addr);
        if endpoints.is_empty() {
            inner.by_user.remove(&user_id);
        }
    }
    Some(user_id)
}

/// Spawn the periodic TTL sweeper for the subscriber registry.
pub fn spawn_subscriber_sweeper(
    registry: std::sync::Arc<SubscriberRegistry>,
    config: DatagramConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = config.sweep_interval.as_secs(),
            ttl_secs = config.endpoint_ttl.as_secs(),
            "subscriber sweeper started"
        );
        let mut timer = interval(config.sweep_interval);
        timer.tick().await;

        loop {
            timer.tick().await;
            let removed = registry.sweep_stale(config.endpoint_ttl);
            for (user_id, addr) in removed {
                tracing::info!(user_id = %user_id, addr = %addr, "removed stale subscriber");
            }
        }
    })
}

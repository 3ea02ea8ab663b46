//! Datagram fan-out: one notification per registered endpoint.

use super::subscription::SubscriberRegistry;
use crate::bridge::DatagramBroadcaster;
use crate::metrics::ServerMetrics;
use async_trait::async_trait;
use mangahub_types::Datagram;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Writes `notification` datagrams through the server socket. This is the
/// capability the bridge holds for the datagram leg.
pub struct NotificationBroadcaster {
    socket: Arc<UdpSocket>,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<ServerMetrics>,
}

impl NotificationBroadcaster {
    /// Create a broadcaster over the server socket and registry.
    pub fn new(
        socket: Arc<UdpSocket>,
        registry: Arc<SubscriberRegistry>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            socket,
            registry,
            metrics,
        }
    }
}

#[async_trait]
impl DatagramBroadcaster for NotificationBroadcaster {
    async fn broadcast_to_user(&self, user_id: &str, event_type: &str, data: &Value) {
        let subscribers = self.registry.subscribers_for(user_id, event_type);
        if subscribers.is_empty() {
            tracing::debug!(user_id, event_type, "no datagram subscribers");
            return;
        }

        let bytes = match Datagram::notification(user_id, event_type, data)
            .and_then(|msg| msg.to_bytes())
        {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize notification");
                return;
            }
        };

        let mut success = 0usize;
        let mut failed = 0usize;
        for subscriber in &subscribers {
            match self.socket.send_to(&bytes, subscriber.addr).await {
                Ok(_) => {
                    success += 1;
                    self.metrics.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    failed += 1;
                    self.metrics
                        .datagram_failures
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        user_id,
                        addr = %subscriber.addr,
                        error = %err,
                        "notification send failed"
                    );
                }
            }
        }

        tracing::info!(
            user_id,
            event_type,
            success,
            failed,
            total = subscribers.len(),
            "datagram broadcast complete"
        );
    }
}

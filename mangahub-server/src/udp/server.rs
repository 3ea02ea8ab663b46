//! Receive loop and packet handlers for the notification server.

use super::broadcaster::NotificationBroadcaster;
use super::subscription::SubscriberRegistry;
use crate::auth::TokenVerifier;
use crate::metrics::ServerMetrics;
use mangahub_types::messages::{
    RegisterPayload, SubscribePayload, DG_EVENT_ALL, DG_EVENT_LIBRARY_UPDATE,
    DG_EVENT_PROGRESS_UPDATE,
};
use mangahub_types::{Datagram, DatagramError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::task::JoinHandle;

const MAX_PACKET_SIZE: usize = 4096;

/// The connectionless notification server.
pub struct DatagramServer {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    registry: Arc<SubscriberRegistry>,
    verifier: Arc<dyn TokenVerifier>,
    metrics: Arc<ServerMetrics>,
    running: Arc<AtomicBool>,
}

impl DatagramServer {
    /// Bind the socket. Pass port 0 to let the OS choose (tests).
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        verifier: Arc<dyn TokenVerifier>,
        metrics: Arc<ServerMetrics>,
    ) -> Result<Self, DatagramError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| DatagramError::Bind(e.to_string()))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| DatagramError::Bind(e.to_string()))?;

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            registry: Arc::new(SubscriberRegistry::default()),
            verifier,
            metrics,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The endpoint registry (shared with the TTL sweeper and HTTP
    /// surface).
    pub fn registry(&self) -> Arc<SubscriberRegistry> {
        Arc::clone(&self.registry)
    }

    /// Build the broadcaster capability handed to the bridge.
    pub fn broadcaster(&self) -> NotificationBroadcaster {
        NotificationBroadcaster::new(
            Arc::clone(&self.socket),
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
        )
    }

    /// Spawn the receive loop; each packet is handled on its own task.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let server = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(addr = %server.local_addr, "notification server listening");
            let mut buffer = vec![0u8; MAX_PACKET_SIZE];
            while server.running.load(Ordering::SeqCst) {
                match server.socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if len == 0 {
                            continue;
                        }
                        let packet = buffer[..len].to_vec();
                        let server = Arc::clone(&server);
                        tokio::spawn(async move {
                            server.handle_packet(packet, addr).await;
                        });
                    }
                    Err(err) => {
                        if server.running.load(Ordering::SeqCst) {
                            tracing::warn!(error = %err, "datagram read error");
                        }
                    }
                }
            }
        })
    }

    /// Stop the receive loop at the next packet. The owner aborts the
    /// handle returned from [`start`] for an immediate stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("notification server stopped");
    }

    async fn handle_packet(&self, data: Vec<u8>, addr: SocketAddr) {
        let message = match Datagram::parse(&data) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(addr = %addr, error = %err, "invalid packet");
                self.reply(addr, DatagramError::InvalidPacket.to_datagram())
                    .await;
                return;
            }
        };

        tracing::debug!(addr = %addr, kind = %message.kind, "packet received");

        match message.kind.as_str() {
            "register" => self.handle_register(addr, &message).await,
            "unregister" => self.handle_unregister(addr).await,
            "subscribe" => self.handle_subscribe(addr, &message).await,
            "heartbeat" => self.handle_heartbeat(addr).await,
            other => {
                tracing::warn!(addr = %addr, kind = other, "unknown message type");
                self.reply(
                    addr,
                    Datagram::error(DatagramError::InvalidPacket.code(), "unknown message type"),
                )
                .await;
            }
        }
    }

    async fn handle_register(&self, addr: SocketAddr, message: &Datagram) {
        let body: RegisterPayload = match message.data_as() {
            Ok(body) => body,
            Err(_) => {
                self.reply(
                    addr,
                    Datagram::error(
                        DatagramError::NotRegistered.code(),
                        "invalid registration payload",
                    ),
                )
                .await;
                return;
            }
        };

        let claims = match self.verifier.verify(&body.token) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::warn!(addr = %addr, error = %err, "authentication failed");
                self.reply(addr, DatagramError::AuthFailed.to_datagram())
                    .await;
                return;
            }
        };

        self.registry
            .subscribe(&claims.user_id, addr, vec![DG_EVENT_ALL.to_string()]);

        tracing::info!(
            user_id = %claims.user_id,
            username = %claims.username,
            addr = %addr,
            "client registered"
        );
        self.reply(addr, Datagram::success("registered successfully"))
            .await;
    }

    async fn handle_unregister(&self, addr: SocketAddr) {
        match self.registry.unsubscribe(addr) {
            Some(user_id) => {
                tracing::info!(user_id = %user_id, addr = %addr, "client unregistered");
                self.reply(addr, Datagram::success("unregistered successfully"))
                    .await;
            }
            None => {
                self.reply(
                    addr,
                    Datagram::error(DatagramError::NotRegistered.code(), "not registered"),
                )
                .await;
            }
        }
    }

    async fn handle_subscribe(&self, addr: SocketAddr, message: &Datagram) {
        let body: SubscribePayload = match message.data_as() {
            Ok(body) => body,
            Err(_) => {
                self.reply(
                    addr,
                    Datagram::error(
                        DatagramError::SubscriptionFailed(String::new()).code(),
                        "invalid subscription payload",
                    ),
                )
                .await;
                return;
            }
        };

        for event_type in &body.event_types {
            let valid = matches!(
                event_type.as_str(),
                DG_EVENT_ALL | DG_EVENT_PROGRESS_UPDATE | DG_EVENT_LIBRARY_UPDATE
            );
            if !valid {
                self.reply(
                    addr,
                    DatagramError::InvalidEventType(event_type.clone()).to_datagram(),
                )
                .await;
                return;
            }
        }

        if !self.registry.update_filter(addr, body.event_types.clone()) {
            self.reply(
                addr,
                Datagram::error(
                    DatagramError::SubscriptionFailed(String::new()).code(),
                    "not registered",
                ),
            )
            .await;
            return;
        }

        let user_id = self.registry.user_for(addr).unwrap_or_default();
        tracing::info!(
            user_id = %user_id,
            addr = %addr,
            event_types = ?body.event_types,
            "subscription updated"
        );
        self.reply(addr, Datagram::success("subscription updated successfully"))
            .await;
    }

    async fn handle_heartbeat(&self, addr: SocketAddr) {
        if !self.registry.heartbeat(addr) {
            self.reply(addr, DatagramError::HeartbeatFailed.to_datagram())
                .await;
            return;
        }
        self.reply(addr, Datagram::success("OK")).await;
    }

    async fn reply(&self, addr: SocketAddr, message: Datagram) {
        let bytes = match message.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(error = %err, "failed to serialize datagram reply");
                return;
            }
        };
        if let Err(err) = self.socket.send_to(&bytes, addr).await {
            tracing::warn!(addr = %addr, error = %err, "failed to send reply");
        }
    }
}

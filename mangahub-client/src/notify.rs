//! Datagram notification listener.
//!
//! The channel is best-effort: notifications are hints, and any single one
//! may be lost. Reconcile via the session client when exact state matters.

use crate::error::ClientError;
use mangahub_types::messages::{RegisterPayload, SubscribePayload};
use mangahub_types::Datagram;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::time::{timeout, Instant};

const MAX_PACKET_SIZE: usize = 4096;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// A registered endpoint on the notification channel.
pub struct NotifyListener {
    socket: UdpSocket,
}

impl NotifyListener {
    /// Bind an ephemeral local port and aim it at the notification server.
    pub async fn connect<A: ToSocketAddrs>(server: A) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;
        Ok(Self { socket })
    }

    /// Raw packet send. Test hook for malformed packets.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<(), ClientError> {
        self.socket.send(bytes).await?;
        Ok(())
    }

    /// Receive the next packet of any kind.
    pub async fn recv_raw(&self, deadline: Duration) -> Result<Datagram, ClientError> {
        let mut buffer = vec![0u8; MAX_PACKET_SIZE];
        let len = timeout(deadline, self.socket.recv(&mut buffer))
            .await
            .map_err(|_| ClientError::Timeout)??;
        Ok(Datagram::parse(&buffer[..len])?)
    }

    async fn request(&self, message: Datagram) -> Result<Datagram, ClientError> {
        self.socket.send(&message.to_bytes()?).await?;
        // Replies and notifications share the socket; skip notifications
        // while waiting for the reply.
        let until = Instant::now() + REPLY_TIMEOUT;
        loop {
            let remaining = until
                .checked_duration_since(Instant::now())
                .ok_or(ClientError::Timeout)?;
            let reply = self.recv_raw(remaining).await?;
            if reply.kind != "notification" {
                return Ok(reply);
            }
        }
    }

    fn expect_success(reply: Datagram) -> Result<(), ClientError> {
        match reply.kind.as_str() {
            "success" => Ok(()),
            "error" => {
                let body: ErrorBody = reply.data_as()?;
                Err(ClientError::Datagram {
                    code: body.code,
                    message: body.message,
                })
            }
            other => Err(ClientError::UnexpectedReply {
                expected: "success",
                actual: other.to_string(),
            }),
        }
    }

    /// Register this endpoint with a bearer token. The filter starts as
    /// `{all}`.
    pub async fn register(&self, token: &str) -> Result<(), ClientError> {
        let msg = Datagram::data_message(
            "register",
            &RegisterPayload {
                token: token.to_string(),
            },
        )?;
        Self::expect_success(self.request(msg).await?)
    }

    /// Replace the event-type filter.
    pub async fn subscribe(&self, event_types: &[&str]) -> Result<(), ClientError> {
        let msg = Datagram::data_message(
            "subscribe",
            &SubscribePayload {
                event_types: event_types.iter().map(|s| s.to_string()).collect(),
            },
        )?;
        Self::expect_success(self.request(msg).await?)
    }

    /// Refresh the endpoint's TTL.
    pub async fn heartbeat(&self) -> Result<(), ClientError> {
        let msg = Datagram::data_message("heartbeat", &serde_json::json!({}))?;
        Self::expect_success(self.request(msg).await?)
    }

    /// Drop the registration.
    pub async fn unregister(&self) -> Result<(), ClientError> {
        let msg = Datagram::data_message("unregister", &serde_json::json!({}))?;
        Self::expect_success(self.request(msg).await?)
    }

    /// Wait for the next `notification` datagram, skipping anything else.
    pub async fn recv_notification(&self, deadline: Duration) -> Result<Datagram, ClientError> {
        let until = Instant::now() + deadline;
        loop {
            let remaining = until
                .checked_duration_since(Instant::now())
                .ok_or(ClientError::Timeout)?;
            let message = self.recv_raw(remaining).await?;
            if message.kind == "notification" {
                return Ok(message);
            }
        }
    }
}

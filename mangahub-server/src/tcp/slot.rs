//! Connection slots: the transport + writer-mutex triple for one duplex
//! connection.

use crate::bridge::UpdateSink;
use async_trait::async_trait;
use mangahub_types::{Envelope, SessionError};
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// The user bound to a slot after a successful `auth`.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Opaque user id from the token claims.
    pub user_id: String,
    /// Display name from the token claims.
    pub username: String,
}

/// One live duplex connection.
///
/// The decode task owns the read half; the write half lives here behind a
/// mutex so the bridge fan-out and the handler never interleave frames.
pub struct ConnectionSlot {
    client_id: String,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    identity: RwLock<Option<Identity>>,
}

impl ConnectionSlot {
    /// Wrap the write half of an accepted connection.
    pub fn new(
        client_id: String,
        writer: OwnedWriteHalf,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Self {
        Self {
            client_id,
            peer_addr,
            local_addr,
            writer: Mutex::new(writer),
            identity: RwLock::new(None),
        }
    }

    /// The connection's id (a fresh UUID per accept).
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The local side of the socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The bound user, once authenticated.
    pub fn identity(&self) -> Option<Identity> {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bind a user to this slot.
    pub fn set_identity(&self, identity: Identity) {
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(identity);
    }

    /// Write one frame, serialized and newline-terminated.
    pub async fn write_frame(&self, envelope: &Envelope) -> Result<(), SessionError> {
        let line = envelope
            .to_line()
            .map_err(|e| SessionError::Other(e.to_string()))?;
        self.write_line(&line).await
    }

    /// Write one pre-serialized line.
    pub async fn write_line(&self, line: &str) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SessionError::NetworkWrite(e.to_string()))
    }

    /// Half-close the transport.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

#[async_trait]
impl UpdateSink for ConnectionSlot {
    fn sink_id(&self) -> &str {
        &self.client_id
    }

    async fn send_line(&self, line: &str) -> Result<(), SessionError> {
        self.write_line(line).await
    }
}

//! Accept loop and slot table for the session server.

use super::handler::{cleanup_connection, drive_connection};
use super::slot::ConnectionSlot;
use super::SessionContext;
use crate::config::LivenessConfig;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::interval;

/// Live connection slots keyed by client id.
pub type SlotTable = Arc<DashMap<String, SlotEntry>>;

/// A slot plus the abort handle of its decode task.
pub struct SlotEntry {
    /// The connection slot.
    pub slot: Arc<ConnectionSlot>,
    abort: AbortHandle,
}

/// The duplex session server.
pub struct SessionServer {
    ctx: Arc<SessionContext>,
    listener: TcpListener,
    local_addr: SocketAddr,
    slots: SlotTable,
    running: Arc<AtomicBool>,
}

impl SessionServer {
    /// Bind the listener. Pass port 0 to let the OS choose (tests).
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        ctx: Arc<SessionContext>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            ctx,
            listener,
            local_addr,
            slots: Arc::new(DashMap::new()),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Live connection count.
    pub fn connection_count(&self) -> usize {
        self.slots.len()
    }

    /// Spawn the accept loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let server = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(addr = %server.local_addr, "session server listening");
            while server.running.load(Ordering::SeqCst) {
                match server.listener.accept().await {
                    Ok((stream, peer)) => server.register_connection(stream, peer),
                    Err(err) => {
                        if server.running.load(Ordering::SeqCst) {
                            tracing::warn!(error = %err, "accept error");
                        }
                    }
                }
            }
        })
    }

    fn register_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let local = stream.local_addr().unwrap_or(self.local_addr);
        let (read_half, write_half) = stream.into_split();

        let client_id = uuid::Uuid::new_v4().to_string();
        let slot = Arc::new(ConnectionSlot::new(
            client_id.clone(),
            write_half,
            peer,
            local,
        ));

        let handle = tokio::spawn(drive_connection(
            Arc::clone(&self.ctx),
            Arc::clone(&slot),
            read_half,
            Arc::clone(&self.slots),
        ));

        self.slots.insert(
            client_id,
            SlotEntry {
                slot,
                abort: handle.abort_handle(),
            },
        );
        self.ctx
            .metrics
            .active_connections
            .store(self.slots.len() as i64, Ordering::Relaxed);
    }

    /// Forcibly drop a connection: abort its decode task, run the shared
    /// cleanup, and close the transport.
    pub async fn evict(&self, client_id: &str) {
        if let Some((_, entry)) = self.slots.remove(client_id) {
            entry.abort.abort();
            cleanup_connection(&self.ctx, &entry.slot);
            entry.slot.shutdown().await;
        }
        self.ctx
            .metrics
            .active_connections
            .store(self.slots.len() as i64, Ordering::Relaxed);
    }

    /// Spawn the periodic liveness sweeper. Sessions whose heartbeat is
    /// older than the configured timeout are evicted, which also removes
    /// them from the registry and the bridge fan-out map.
    pub fn spawn_liveness_sweeper(self: &Arc<Self>, config: LivenessConfig) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = config.sweep_interval.as_secs(),
                timeout_secs = config.heartbeat_timeout.as_secs(),
                "liveness sweeper started"
            );
            let mut timer = interval(config.sweep_interval);
            // The first tick fires immediately; skip it.
            timer.tick().await;

            loop {
                timer.tick().await;
                let stale = server.ctx.monitor.stale_clients(config.heartbeat_timeout);
                for client_id in stale {
                    tracing::info!(client_id = %client_id, "evicting stale session");
                    server
                        .ctx
                        .metrics
                        .stale_evictions
                        .fetch_add(1, Ordering::Relaxed);
                    server.evict(&client_id).await;
                }
            }
        })
    }

    /// Stop accepting and drop every live connection. The accept task
    /// itself is stopped by aborting the handle returned from [`start`].
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let client_ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        for client_id in client_ids {
            self.evict(&client_id).await;
        }
        tracing::info!("session server stopped");
    }
}

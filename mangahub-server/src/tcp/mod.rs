//! The duplex session server.
//!
//! One decode task per accepted connection, a per-slot writer mutex for
//! fan-out, and a per-connection state machine:
//! `unauth -> auth -> connected`.

mod handler;
mod server;
mod slot;

pub use server::{SessionServer, SlotEntry, SlotTable};
pub use slot::{ConnectionSlot, Identity};

use crate::auth::TokenVerifier;
use crate::bridge::Bridge;
use crate::liveness::HeartbeatMonitor;
use crate::metrics::ServerMetrics;
use crate::registry::SessionRegistry;
use crate::storage::ProgressStore;
use std::sync::Arc;

/// Shared collaborators every connection handler needs.
pub struct SessionContext {
    /// The store gateway mutations commit through.
    pub store: Arc<dyn ProgressStore>,
    /// Owner of all session records.
    pub registry: Arc<SessionRegistry>,
    /// Per-device liveness tracking.
    pub monitor: Arc<HeartbeatMonitor>,
    /// Mutation fan-out hub.
    pub bridge: Arc<Bridge>,
    /// Bearer-token validation.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Shared counters.
    pub metrics: Arc<ServerMetrics>,
}

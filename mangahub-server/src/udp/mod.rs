//! The connectionless notification server.
//!
//! Best-effort by design: no ordering, no retransmission, no duplicate
//! suppression. Recipients treat notifications as hints and reconcile
//! through the session server when exact state is required.

mod broadcaster;
mod server;
mod subscription;

pub use broadcaster::NotificationBroadcaster;
pub use server::DatagramServer;
pub use subscription::{spawn_subscriber_sweeper, Endpoint, SubscriberRegistry};

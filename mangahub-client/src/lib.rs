//! # mangahub-client
//!
//! Protocol client for the MangaHub sync core. [`SessionClient`] speaks the
//! newline-delimited JSON session protocol over TCP; [`NotifyListener`]
//! registers on the connectionless notification channel. The companion CLI
//! renders on top of these; the integration suite drives the servers
//! through them.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
pub mod notify;
pub mod session;

pub use error::ClientError;
pub use notify::NotifyListener;
pub use session::{query_status, SessionClient};

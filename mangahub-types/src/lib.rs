//! # mangahub-types
//!
//! Shared protocol types for the MangaHub sync core.
//!
//! The sync core speaks two wire dialects built from the same JSON
//! vocabulary:
//! - newline-delimited JSON envelopes on the duplex (TCP) session channel,
//! - one JSON object per packet on the connectionless (UDP) notification
//!   channel.
//!
//! This crate owns the envelope framing, the typed payloads for every
//! operation, and the structured error taxonomy both servers reply with.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod envelope;
pub mod error;
pub mod messages;

pub use envelope::{Datagram, Envelope, FrameError};
pub use error::{DatagramError, ErrorCategory, ErrorPayload, SessionError};
pub use messages::ReadingStatus;

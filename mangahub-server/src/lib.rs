//! # mangahub-server
//!
//! Real-time synchronization and notification core for the MangaHub
//! multi-device manga-library service.
//!
//! ```text
//! Device A ──┐  newline-delimited JSON (TCP)  ┌── Device B
//!            ├────────────────────────────────┤
//!        ┌───┴────────────────────────────────┴───┐
//!        │           session server               │
//!        │     registry · liveness · handler      │
//!        │                  │                     │
//!        │            event bridge ───────────────┼──▶ UDP notifications
//!        │                  │                     │
//!        │          SQLite (user_progress)        │
//!        └────────────────────────────────────────┘
//! ```
//!
//! Mutations arrive over the session server (or from the HTTP admin
//! surface), commit through the store gateway, then fan out through the
//! bridge to every interested device on both transports.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod http;
pub mod liveness;
pub mod metrics;
pub mod registry;
pub mod storage;
pub mod tcp;
pub mod udp;

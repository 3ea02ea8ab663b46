//! Structured error taxonomy for both transports.
//!
//! Every fault a server can report on the wire has a stable code. Duplex
//! codes are namespaced by category (`NET-*`, `PROTO-*`, `AUTH-*`, `BIZ-*`,
//! `DB-*`); datagram codes share the single `UDP-*` namespace.

use crate::envelope::{Datagram, Envelope};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of a duplex-channel fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorCategory {
    /// Transport-level fault, fatal for the connection slot.
    Network,
    /// Malformed or unexpected frame; recoverable per-frame.
    Protocol,
    /// Token or authentication-state fault; recoverable per-frame.
    Auth,
    /// Domain validation fault; recoverable per-operation.
    Business,
    /// Store fault; reported generically, cause goes to the log.
    Database,
}

impl ErrorCategory {
    /// The wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "NETWORK",
            ErrorCategory::Protocol => "PROTOCOL",
            ErrorCategory::Auth => "AUTH",
            ErrorCategory::Business => "BUSINESS",
            ErrorCategory::Database => "DATABASE",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a duplex `error` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable code, e.g. `BIZ-001`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Fault category.
    pub category: ErrorCategory,
}

/// A fault on the duplex session channel.
#[derive(Debug, Error)]
pub enum SessionError {
    /// NET-001
    #[error("connection failed: {0}")]
    NetworkConnection(String),
    /// NET-002
    #[error("network timeout: {0}")]
    NetworkTimeout(String),
    /// NET-003
    #[error("client disconnected: {0}")]
    NetworkDisconnected(String),
    /// NET-004
    #[error("failed to read from connection: {0}")]
    NetworkRead(String),
    /// NET-005
    #[error("failed to write to connection: {0}")]
    NetworkWrite(String),

    /// PROTO-001
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
    /// PROTO-002
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// PROTO-003
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// PROTO-004
    #[error("message too large: {size} bytes")]
    MessageTooLarge {
        /// Size of the offending frame.
        size: usize,
    },

    /// AUTH-001
    #[error("token is required")]
    TokenMissing,
    /// AUTH-002
    #[error("invalid or expired token")]
    TokenInvalid,
    /// AUTH-003
    #[error("token has expired")]
    TokenExpired,
    /// AUTH-004
    #[error("authentication required")]
    NotAuthenticated,
    /// AUTH-005
    #[error("permission denied")]
    PermissionDenied,

    /// BIZ-001
    #[error("manga not found: {0}")]
    MangaNotFound(String),
    /// BIZ-002
    #[error("invalid chapter number: {0}")]
    InvalidChapter(i64),
    /// BIZ-003
    #[error("invalid status, must be reading, completed or plan_to_read: {0}")]
    InvalidStatus(String),
    /// BIZ-005
    #[error("manga not in library: {0}")]
    NotInLibrary(String),
    /// BIZ-006
    #[error("manga id is required")]
    InvalidMangaId,

    /// DB-001
    #[error("database query failed")]
    DbQuery(String),
    /// DB-002
    #[error("database connection failed")]
    DbConnection(String),
    /// DB-003
    #[error("database constraint violated")]
    DbConstraint(String),
    /// DB-004
    #[error("record not found")]
    DbNotFound,

    /// BIZ-999 - untyped faults wrapped as generic business errors.
    #[error("{0}")]
    Other(String),
}

impl SessionError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NetworkConnection(_) => "NET-001",
            SessionError::NetworkTimeout(_) => "NET-002",
            SessionError::NetworkDisconnected(_) => "NET-003",
            SessionError::NetworkRead(_) => "NET-004",
            SessionError::NetworkWrite(_) => "NET-005",
            SessionError::InvalidFormat(_) => "PROTO-001",
            SessionError::UnknownType(_) => "PROTO-002",
            SessionError::InvalidPayload(_) => "PROTO-003",
            SessionError::MessageTooLarge { .. } => "PROTO-004",
            SessionError::TokenMissing => "AUTH-001",
            SessionError::TokenInvalid => "AUTH-002",
            SessionError::TokenExpired => "AUTH-003",
            SessionError::NotAuthenticated => "AUTH-004",
            SessionError::PermissionDenied => "AUTH-005",
            SessionError::MangaNotFound(_) => "BIZ-001",
            SessionError::InvalidChapter(_) => "BIZ-002",
            SessionError::InvalidStatus(_) => "BIZ-003",
            SessionError::NotInLibrary(_) => "BIZ-005",
            SessionError::InvalidMangaId => "BIZ-006",
            SessionError::DbQuery(_) => "DB-001",
            SessionError::DbConnection(_) => "DB-002",
            SessionError::DbConstraint(_) => "DB-003",
            SessionError::DbNotFound => "DB-004",
            SessionError::Other(_) => "BIZ-999",
        }
    }

    /// Fault category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::NetworkConnection(_)
            | SessionError::NetworkTimeout(_)
            | SessionError::NetworkDisconnected(_)
            | SessionError::NetworkRead(_)
            | SessionError::NetworkWrite(_) => ErrorCategory::Network,
            SessionError::InvalidFormat(_)
            | SessionError::UnknownType(_)
            | SessionError::InvalidPayload(_)
            | SessionError::MessageTooLarge { .. } => ErrorCategory::Protocol,
            SessionError::TokenMissing
            | SessionError::TokenInvalid
            | SessionError::TokenExpired
            | SessionError::NotAuthenticated
            | SessionError::PermissionDenied => ErrorCategory::Auth,
            SessionError::MangaNotFound(_)
            | SessionError::InvalidChapter(_)
            | SessionError::InvalidStatus(_)
            | SessionError::NotInLibrary(_)
            | SessionError::InvalidMangaId
            | SessionError::Other(_) => ErrorCategory::Business,
            SessionError::DbQuery(_)
            | SessionError::DbConnection(_)
            | SessionError::DbConstraint(_)
            | SessionError::DbNotFound => ErrorCategory::Database,
        }
    }

    /// Only transport faults terminate the slot; everything else is
    /// reported in-band and the connection stays open.
    pub fn is_fatal(&self) -> bool {
        matches!(self.category(), ErrorCategory::Network)
    }

    /// The single `error` envelope reply for this fault.
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            kind: "error".to_string(),
            payload: Some(serde_json::json!({
                "code": self.code(),
                "message": self.to_string(),
                "category": self.category().as_str(),
            })),
        }
    }
}

/// A fault on the connectionless notification channel.
#[derive(Debug, Error)]
pub enum DatagramError {
    /// UDP-001
    #[error("failed to bind UDP port: {0}")]
    Bind(String),
    /// UDP-002
    #[error("invalid packet format")]
    InvalidPacket,
    /// UDP-003
    #[error("not registered")]
    NotRegistered,
    /// UDP-004
    #[error("authentication failed")]
    AuthFailed,
    /// UDP-005
    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),
    /// UDP-006
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),
    /// UDP-007
    #[error("heartbeat failed: not registered")]
    HeartbeatFailed,
    /// UDP-008
    #[error("invalid event type: {0}")]
    InvalidEventType(String),
    /// UDP-009
    #[error("failed to write UDP packet: {0}")]
    WriteFailed(String),
    /// UDP-010
    #[error("failed to read UDP packet: {0}")]
    ReadFailed(String),
}

impl DatagramError {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            DatagramError::Bind(_) => "UDP-001",
            DatagramError::InvalidPacket => "UDP-002",
            DatagramError::NotRegistered => "UDP-003",
            DatagramError::AuthFailed => "UDP-004",
            DatagramError::BroadcastFailed(_) => "UDP-005",
            DatagramError::SubscriptionFailed(_) => "UDP-006",
            DatagramError::HeartbeatFailed => "UDP-007",
            DatagramError::InvalidEventType(_) => "UDP-008",
            DatagramError::WriteFailed(_) => "UDP-009",
            DatagramError::ReadFailed(_) => "UDP-010",
        }
    }

    /// The datagram `error` reply for this fault.
    pub fn to_datagram(&self) -> Datagram {
        Datagram::error(self.code(), &self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_namespaced_by_category() {
        assert_eq!(SessionError::NetworkRead(String::new()).code(), "NET-004");
        assert_eq!(SessionError::InvalidFormat(String::new()).code(), "PROTO-001");
        assert_eq!(SessionError::NotAuthenticated.code(), "AUTH-004");
        assert_eq!(SessionError::MangaNotFound("m".into()).code(), "BIZ-001");
        assert_eq!(SessionError::NotInLibrary("m".into()).code(), "BIZ-005");
        assert_eq!(SessionError::InvalidMangaId.code(), "BIZ-006");
        assert_eq!(SessionError::DbNotFound.code(), "DB-004");
    }

    #[test]
    fn only_network_faults_are_fatal() {
        assert!(SessionError::NetworkWrite("broken pipe".into()).is_fatal());
        assert!(!SessionError::InvalidFormat("bad json".into()).is_fatal());
        assert!(!SessionError::TokenInvalid.is_fatal());
        assert!(!SessionError::DbQuery("locked".into()).is_fatal());
    }

    #[test]
    fn error_envelope_shape() {
        let env = SessionError::InvalidChapter(-1).to_envelope();
        assert_eq!(env.kind, "error");
        let payload: ErrorPayload =
            serde_json::from_value(env.payload.unwrap()).unwrap();
        assert_eq!(payload.code, "BIZ-002");
        assert_eq!(payload.category, ErrorCategory::Business);
        assert!(payload.message.contains("-1"));
    }

    #[test]
    fn datagram_codes() {
        assert_eq!(DatagramError::InvalidPacket.code(), "UDP-002");
        assert_eq!(DatagramError::InvalidEventType("x".into()).code(), "UDP-008");

        let reply = DatagramError::HeartbeatFailed.to_datagram();
        assert_eq!(reply.kind, "error");
        assert_eq!(reply.data.unwrap()["code"], "UDP-007");
    }

    #[test]
    fn category_wire_names_are_uppercase() {
        assert_eq!(ErrorCategory::Business.as_str(), "BUSINESS");
        assert_eq!(
            serde_json::to_string(&ErrorCategory::Database).unwrap(),
            "\"DATABASE\""
        );
    }
}

//! Client-side error type.

use mangahub_types::{ErrorPayload, FrameError};

/// Errors surfaced by the protocol clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport fault.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec fault on a frame we sent or received.
    #[error("codec error: {0}")]
    Frame(#[from] FrameError),

    /// A connect or read deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// The server closed the connection.
    #[error("connection closed by server")]
    Closed,

    /// The server replied with a structured `error` envelope.
    #[error("server error {}: {} ({})", .0.code, .0.message, .0.category)]
    Server(ErrorPayload),

    /// The server replied with a datagram `error`.
    #[error("datagram error {code}: {message}")]
    Datagram {
        /// Stable `UDP-NNN` code.
        code: String,
        /// Human-readable description.
        message: String,
    },

    /// The server replied with a frame of an unexpected type.
    #[error("unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        /// What the operation expected.
        expected: &'static str,
        /// What arrived.
        actual: String,
    },
}

impl ClientError {
    /// The structured server fault, when this is one.
    pub fn as_server_fault(&self) -> Option<&ErrorPayload> {
        match self {
            ClientError::Server(payload) => Some(payload),
            _ => None,
        }
    }
}

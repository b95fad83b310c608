//! Error types for majordomo.

use thiserror::Error;

/// Main error type for all broker, worker and client operations.
#[derive(Debug, Error)]
pub enum MdpError {
    /// Error reported by libzmq.
    #[error("ZeroMQ error: {0}")]
    Zmq(#[from] zmq::Error),

    /// Operation on a transport that has been closed.
    #[error("Transport closed")]
    Closed,

    /// Transport failure not originating from libzmq.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unexpected frames (wrong header, too few frames, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while reading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session has no open socket.
    #[error("Not connected")]
    NotConnected,
}

impl MdpError {
    /// Whether the fault should end the current event loop.
    ///
    /// A torn-down context, an interrupted call, an invalid poll set or a
    /// closed transport cannot be retried on the same socket. Everything else
    /// is confined to a single message.
    pub fn is_fatal(&self) -> bool {
        match self {
            MdpError::Zmq(e) => matches!(
                e,
                zmq::Error::ETERM | zmq::Error::EINTR | zmq::Error::EFAULT | zmq::Error::ENOTSOCK
            ),
            MdpError::Closed | MdpError::NotConnected => true,
            _ => false,
        }
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        MdpError::Protocol(msg.into())
    }
}

/// Result type alias using MdpError.
pub type Result<T> = std::result::Result<T, MdpError>;

//! Error types
//!
//! A single crate-wide [`Error`] covers transport, protocol, configuration and
//! lifecycle failures. [`Error::is_transient`] tells a caller whether the
//! failure is scoped to one connection (and therefore recoverable by dropping
//! or re-establishing it) or terminal.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for framecast operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Peer closed the connection cleanly on a frame boundary.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("frame channel closed")]
    ChannelClosed,

    #[error("connection attempts exhausted after {attempts} tries")]
    ConnectionExhausted { attempts: u32 },
}

/// Violations of the length-prefixed envelope format.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed header: need 8 bytes, got {got}")]
    MalformedHeader { got: usize },

    #[error("declared payload of {length} bytes exceeds limit of {max}")]
    PayloadTooLarge { length: u64, max: u64 },

    #[error("declared payload of {declared} bytes but envelope carries {actual}")]
    LengthMismatch { declared: u64, actual: usize },

    #[error("connection closed mid-frame after {received} of {expected} bytes")]
    TruncatedFrame { expected: usize, received: usize },
}

impl Error {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Error::InvalidConfig(reason.into())
    }

    pub(crate) fn timeout(operation: &'static str, after: Duration) -> Self {
        Error::Timeout { operation, after }
    }

    /// Whether the failure is scoped to a single connection.
    ///
    /// Transient errors are handled locally: the sender drops the session,
    /// the receiver reconnects.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Protocol(_) | Error::ConnectionClosed | Error::Timeout { .. }
        )
    }
}

//! Coordinator error types.

use thiserror::Error;

/// Coordinator error type.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The listen socket could not be bound.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer's connection is already closed.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// The peer's outbound queue overflowed; its connection was closed.
    #[error("Outbound queue full: {0}")]
    SlowPeer(String),

    /// A write did not complete within the send timeout.
    #[error("Send timed out after {0:?}")]
    SendTimeout(std::time::Duration),

    /// Internal error (actor mailbox gone, reply dropped).
    #[error("Internal error: {0}")]
    Internal(String),
}

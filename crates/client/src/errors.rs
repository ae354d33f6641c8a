//! Client error types.

use common::config::ConfigError;
use sync_protocol::CodecError;
use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No media file on the command line.
    #[error("Usage: lockstep-client <media-file>")]
    MissingMediaFile,

    /// The player process could not be started.
    #[error("Failed to start player: {0}")]
    PlayerSpawn(String),

    /// The player started but its IPC socket never became usable.
    #[error("Player IPC unavailable: {0}")]
    PlayerIpc(String),

    /// The player process exited. Ends the session.
    #[error("Player exited")]
    PlayerExited,

    /// Dialing the coordinator failed or timed out.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Reading or writing the coordinator stream failed.
    #[error("Transport error: {0}")]
    Transport(#[from] CodecError),

    /// Internal error (task gone, channel closed).
    #[error("Internal error: {0}")]
    Internal(String),
}

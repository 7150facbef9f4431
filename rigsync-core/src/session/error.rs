//! Session error types.

use thiserror::Error;

use crate::codec::{CodecError, SinkError};
use crate::transport::TransportError;

/// Errors surfaced by a sync session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Failed to apply animation: {0}")]
    Sink(#[from] SinkError),

    /// The reconnect budget was used up without reaching the server.
    #[error("Could not reach the server after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },

    #[error("Not connected to the server")]
    NotConnected,

    #[error("No armature selected")]
    NoArmature,

    /// The session was reset before the request finished.
    #[error("Request cancelled")]
    Cancelled,

    #[error("Sync session has shut down")]
    SessionClosed,
}

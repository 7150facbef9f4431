//! Transport error types.

use thiserror::Error;

/// Failure reason for a single request to the counterpart server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Connection refused, timeout, or any other network-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response arrived but its body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The server answered with a non-success status.
    ///
    /// Displays the server-provided message verbatim.
    #[error("{message}")]
    ServerRejected { status: u16, message: String },
}

impl TransportError {
    /// Returns the HTTP status for server rejections.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::ServerRejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the server could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, TransportError::Transport(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Transport(e.to_string())
        }
    }
}

//! Error types for tether connections

use thiserror::Error;

/// Errors that can occur on a tether connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TetherError {
    /// Dialing or the handshake failed
    #[error("Connect error: {0}")]
    Connect(String),

    /// A send was attempted while no transport is live
    #[error("closed connection")]
    Closed,

    /// Reading from or writing to a live transport failed
    #[error("Transport error: {0}")]
    Transport(String),
}

impl TetherError {
    /// True for failures of an established transport.
    pub fn is_transport(&self) -> bool {
        matches!(self, TetherError::Transport(_))
    }
}

/// Result type for tether operations
pub type Result<T> = std::result::Result<T, TetherError>;

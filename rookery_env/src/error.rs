//! Error types for the Rookery environment abstraction.

use thiserror::Error;

/// Errors that can occur when talking to an external collaborator.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Request could not be delivered (connection refused, DNS, TLS, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote service answered with a non-success status
    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The move-decision engine failed (crashed, refused, bad output)
    #[error("Engine error: {0}")]
    Engine(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// A stream ended or its channel was dropped
    #[error("Stream closed: {0}")]
    StreamClosed(String),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates an engine error.
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine(msg.into())
    }

    /// Creates a decode error.
    pub fn decode(msg: impl std::fmt::Display) -> Self {
        Self::Decode(msg.to_string())
    }

    /// Returns true if the remote service actively refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

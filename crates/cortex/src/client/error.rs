//! Client-side error types.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to relay failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The relay answered with a non-success status.
    #[error("relay returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("unexpected response from relay: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Whether the relay reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Server { status: 404, .. })
    }
}

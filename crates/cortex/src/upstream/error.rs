//! Upstream client error types.

use thiserror::Error;

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors that can occur while talking to the completion API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection, TLS, timeout, or body read failure.
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Upstream reported an error inside an otherwise successful response.
    #[error("upstream error: {0}")]
    Api(String),

    /// Response body did not have the expected shape.
    #[error("failed to parse upstream response: {0}")]
    Decode(String),

    /// No credentials are configured.
    #[error("no API key configured for the completion service")]
    MissingApiKey,
}

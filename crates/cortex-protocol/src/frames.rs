//! Relay-to-client event payloads.
//!
//! Each frame travels as one `data:` line carrying a JSON object:
//!
//! - `{"token": "<fragment>"}`: zero or more per turn
//! - `{"done": true}`: terminal success, always last
//! - `{"error": "<message>"}`: terminal failure, sent in place of `done`

use serde::{Deserialize, Serialize};

/// One relay event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelayFrame {
    Token { token: String },
    Done { done: bool },
    Error { error: String },
}

impl RelayFrame {
    pub fn token(fragment: impl Into<String>) -> Self {
        Self::Token {
            token: fragment.into(),
        }
    }

    pub fn done() -> Self {
        Self::Done { done: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Whether this frame ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// JSON payload for the `data:` line.
    pub fn to_data(&self) -> String {
        // Serializing a plain enum of strings and bools cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"encoding failed"}"#.into())
    }

    /// Parse a `data:` payload. Returns `None` for anything that is not a
    /// recognizable relay frame, including `{"done": false}`.
    pub fn parse(data: &str) -> Option<Self> {
        serde_json::from_str(data.trim())
            .ok()
            .filter(|frame| !matches!(frame, Self::Done { done: false }))
    }
}

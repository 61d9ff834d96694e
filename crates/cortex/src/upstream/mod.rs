//! Upstream completion client.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint in two modes:
//!
//! - **blocking**: one request, whole reply; failures degrade to a fallback
//!   string and never reach the caller
//! - **streaming**: fragments are pushed into a caller-supplied channel as
//!   soon as each upstream frame is decoded; failures propagate

mod client;
mod error;
mod types;

use async_trait::async_trait;
use cortex_protocol::{FALLBACK_MESSAGE, Message};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use client::CompletionClient;
pub use error::{UpstreamError, UpstreamResult};

/// Connection settings for the completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Bearer token. Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub connect_timeout_secs: u64,
    /// Whole-request timeout for blocking mode. Streams are not bounded.
    pub request_timeout_secs: u64,
    /// Reply substituted when no text could be generated.
    pub fallback_message: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            connect_timeout_secs: 10,
            request_timeout_secs: 120,
            fallback_message: FALLBACK_MESSAGE.to_string(),
        }
    }
}

/// A source of assistant replies.
///
/// [`CompletionClient`] is the production implementation; the relay only
/// depends on this trait.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Request a whole reply, surfacing failures.
    async fn try_complete(&self, messages: &[Message]) -> UpstreamResult<String>;

    /// Stream a reply into `sink`, one fragment per upstream frame, and
    /// return the concatenated text.
    ///
    /// Ends on the upstream end-of-stream sentinel or on orderly close. If
    /// the receiving side of `sink` goes away, reading stops and the text
    /// gathered so far is returned.
    async fn stream(
        &self,
        messages: &[Message],
        sink: mpsc::Sender<String>,
    ) -> UpstreamResult<String>;

    /// Text substituted for a reply that could not be generated.
    fn fallback_message(&self) -> &str;

    /// Blocking mode: never fails.
    async fn complete(&self, messages: &[Message]) -> String {
        match self.try_complete(messages).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "completion failed, using fallback reply");
                self.fallback_message().to_string()
            }
        }
    }
}

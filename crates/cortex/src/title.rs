//! Thread title suggestions.

use std::sync::Arc;

use cortex_protocol::Message;
use serde::{Deserialize, Serialize};

use crate::upstream::CompletionBackend;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    /// Ask the completion service for a title. When off, every new thread
    /// gets `default_title`.
    pub enabled: bool,
    pub default_title: String,
    /// Longer suggestions are discarded.
    pub max_chars: usize,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_title: "New Chat".to_string(),
            max_chars: 80,
        }
    }
}

/// Names new threads after their first user message.
#[derive(Clone)]
pub struct TitleGenerator {
    upstream: Arc<dyn CompletionBackend>,
    config: TitleConfig,
}

impl TitleGenerator {
    pub fn new(upstream: Arc<dyn CompletionBackend>, config: TitleConfig) -> Self {
        Self { upstream, config }
    }

    /// Never fails; any problem yields the default title.
    pub async fn suggest(&self, first_message: &str) -> String {
        if !self.config.enabled {
            return self.config.default_title.clone();
        }

        let prompt =
            format!("Generate a short 5-word title for this conversation: \"{first_message}\"");
        let reply = match self.upstream.try_complete(&[Message::user(prompt)]).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "title generation failed");
                return self.config.default_title.clone();
            }
        };

        let title = clean_title(&reply);
        if title.is_empty()
            || title == self.upstream.fallback_message()
            || title.chars().count() > self.config.max_chars
        {
            return self.config.default_title.clone();
        }
        title.to_string()
    }
}

/// Trim whitespace and one pair of surrounding quotes.
fn clean_title(reply: &str) -> &str {
    let trimmed = reply.trim();
    let trimmed = trimmed
        .strip_prefix(['"', '\''])
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix(['"', '\'']).unwrap_or(trimmed);
    trimmed.trim()
}

//! HTTP client for the chat-completions endpoint.

use std::time::Duration;

use async_trait::async_trait;
use cortex_protocol::{Frame, FrameDecoder, Message};
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;

use super::error::{UpstreamError, UpstreamResult};
use super::types::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ErrorEnvelope};
use super::{CompletionBackend, UpstreamConfig};

/// Payload of the frame that ends an upstream stream.
const DONE_SENTINEL: &str = "[DONE]";

/// Outcome of interpreting one decoded upstream frame.
#[derive(Debug, PartialEq, Eq)]
enum StreamStep {
    Fragment(String),
    Done,
    Skip,
}

/// Client for an OpenAI-compatible completion service.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: Client,
    config: UpstreamConfig,
    api_key: Option<String>,
}

impl CompletionClient {
    pub fn new(config: UpstreamConfig) -> UpstreamResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Send a completion request and reject non-success statuses.
    async fn send(&self, messages: &[Message], stream: bool) -> UpstreamResult<reqwest::Response> {
        let api_key = self.api_key.as_deref().ok_or(UpstreamError::MissingApiKey)?;
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            stream,
        };

        let mut request = self
            .client
            .post(self.completions_url())
            .bearer_auth(api_key)
            .json(&body);
        if !stream {
            request = request.timeout(Duration::from_secs(self.config.request_timeout_secs));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .ok()
            .and_then(|envelope| envelope.error.message)
            .unwrap_or(text);
        Err(UpstreamError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

/// Interpret one upstream frame.
///
/// Chunks without text (role announcements, finish markers) and frames that
/// are not valid chunks are skipped. An in-stream error object fails the
/// stream.
fn interpret_frame(frame: &Frame) -> UpstreamResult<StreamStep> {
    let data = frame.data.trim();
    if data == DONE_SENTINEL {
        return Ok(StreamStep::Done);
    }

    if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(data) {
        let text: String = chunk
            .choices
            .into_iter()
            .filter_map(|choice| choice.delta.content)
            .collect();
        if !text.is_empty() {
            return Ok(StreamStep::Fragment(text));
        }
    }

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(data) {
        return Err(UpstreamError::Api(
            envelope
                .error
                .message
                .unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    if serde_json::from_str::<serde_json::Value>(data).is_err() {
        tracing::debug!(data = %data, "skipping malformed upstream frame");
    }
    Ok(StreamStep::Skip)
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    async fn try_complete(&self, messages: &[Message]) -> UpstreamResult<String> {
        let response = self.send(messages, false).await?;
        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| UpstreamError::Decode("response has no message content".to_string()))
    }

    async fn stream(
        &self,
        messages: &[Message],
        sink: mpsc::Sender<String>,
    ) -> UpstreamResult<String> {
        let response = self.send(messages, true).await?;
        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::new();
        let mut text = String::new();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in decoder.push(&chunk) {
                match interpret_frame(&frame)? {
                    StreamStep::Fragment(fragment) => {
                        text.push_str(&fragment);
                        if sink.send(fragment).await.is_err() {
                            tracing::debug!("fragment receiver dropped, stopping upstream read");
                            return Ok(text);
                        }
                    }
                    StreamStep::Done => return Ok(text),
                    StreamStep::Skip => {}
                }
            }
        }

        if let Some(frame) = decoder.finish()
            && let StreamStep::Fragment(fragment) = interpret_frame(&frame)?
        {
            text.push_str(&fragment);
            let _ = sink.send(fragment).await;
        }
        Ok(text)
    }

    fn fallback_message(&self) -> &str {
        &self.config.fallback_message
    }
}

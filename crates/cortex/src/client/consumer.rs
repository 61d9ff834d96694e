//! HTTP client for the relay API.

use std::time::Duration;

use cortex_protocol::{
    ChatRequest, ErrorBody, FrameDecoder, HealthResponse, Message, RegenerateRequest, RelayFrame,
    RenameRequest, ReplyResponse, ThreadSummary,
};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{ClientError, ClientResult};
use super::reducer::{ConversationView, ViewEvent, apply};

/// How a streamed turn ended, from the client's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    /// The relay sent an error frame, or the request failed.
    Failed(String),
    Cancelled,
}

/// Result of one streamed turn.
#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub outcome: StreamOutcome,
    /// Thread list fetched after the turn, when a refresh was due and
    /// succeeded.
    pub threads: Option<Vec<ThreadSummary>>,
}

/// Default time `send_message` waits for the relay to commit a turn before
/// it keeps the locally rendered reply.
const RECONCILE_TIMEOUT: Duration = Duration::from_secs(5);
const RECONCILE_POLL: Duration = Duration::from_millis(100);

/// Client for a running relay.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
    reconcile_timeout: Duration,
}

impl ChatClient {
    /// `base_url` is the server root, e.g. `http://localhost:8080`.
    pub fn new(base_url: &str) -> ClientResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            reconcile_timeout: RECONCILE_TIMEOUT,
        })
    }

    /// How long a finished turn waits for the server's copy of the thread.
    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    pub async fn health(&self) -> ClientResult<HealthResponse> {
        let response = self.client.get(self.url("/health")).send().await?;
        parse_json(response).await
    }

    pub async fn list_threads(&self) -> ClientResult<Vec<ThreadSummary>> {
        let response = self.client.get(self.url("/thread")).send().await?;
        parse_json(response).await
    }

    pub async fn get_thread(&self, thread_id: &str) -> ClientResult<Vec<Message>> {
        let response = self
            .client
            .get(self.url(&format!("/thread/{thread_id}")))
            .send()
            .await?;
        parse_json(response).await
    }

    pub async fn rename_thread(&self, thread_id: &str, title: &str) -> ClientResult<ThreadSummary> {
        let response = self
            .client
            .patch(self.url(&format!("/thread/{thread_id}")))
            .json(&RenameRequest {
                title: title.to_string(),
            })
            .send()
            .await?;
        parse_json(response).await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> ClientResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/thread/{thread_id}")))
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    /// Load a thread into a view. A thread that does not exist yet is an
    /// empty view.
    pub async fn load_view(&self, thread_id: &str) -> ClientResult<ConversationView> {
        match self.get_thread(thread_id).await {
            Ok(messages) => Ok(ConversationView::new(messages)),
            Err(err) if err.is_not_found() => Ok(ConversationView::default()),
            Err(err) => Err(err),
        }
    }

    /// Replace the last reply with a fresh one, in one step.
    pub async fn regenerate(
        &self,
        view: &mut ConversationView,
        thread_id: &str,
    ) -> ClientResult<String> {
        let response = self
            .client
            .post(self.url("/chat/regenerate"))
            .json(&RegenerateRequest {
                thread_id: thread_id.to_string(),
            })
            .send()
            .await?;
        let ReplyResponse { reply } = parse_json(response).await?;
        update(view, ViewEvent::Regenerated(reply.clone()));
        Ok(reply)
    }

    /// Send `text` and render the streamed reply into `view`.
    ///
    /// `on_token` sees every fragment in arrival order. Cancelling `cancel`
    /// closes the connection; the relay keeps whatever its disconnect policy
    /// says. Failures end the turn with the fallback reply in `view` rather
    /// than an error, so the view is always left consistent.
    ///
    /// When the turn completes, or is cancelled after some text arrived,
    /// `view` is replaced by the server's copy of the thread once the relay
    /// has committed it.
    pub async fn send_message(
        &self,
        view: &mut ConversationView,
        thread_id: &str,
        text: &str,
        cancel: &CancellationToken,
        mut on_token: impl FnMut(&str),
    ) -> TurnSummary {
        let turn_start = view.messages.len();
        update(view, ViewEvent::Submitted(text.to_string()));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => StreamOutcome::Cancelled,
            result = self.open_stream(thread_id, text) => match result {
                Ok(response) => self.consume(view, response, cancel, &mut on_token).await,
                Err(err) => StreamOutcome::Failed(err.to_string()),
            },
        };

        let event = match &outcome {
            StreamOutcome::Completed => ViewEvent::Completed,
            StreamOutcome::Failed(message) => {
                warn!(thread_id, error = %message, "stream failed");
                ViewEvent::Failed
            }
            StreamOutcome::Cancelled => ViewEvent::Cancelled,
        };
        update(view, event);

        let refresh = match outcome {
            StreamOutcome::Cancelled => view.trailing_assistant().is_some(),
            _ => true,
        };
        if refresh && !matches!(outcome, StreamOutcome::Failed(_)) {
            self.reconcile(view, thread_id, turn_start, text).await;
        }
        let threads = if refresh {
            self.list_threads()
                .await
                .inspect_err(|err| warn!(error = %err, "thread list refresh failed"))
                .ok()
        } else {
            None
        };

        TurnSummary { outcome, threads }
    }

    /// Replace `view` with the stored thread once it contains this turn.
    ///
    /// Gives up after the reconcile timeout and keeps the local view, e.g.
    /// when a cancelled turn is still running on the server.
    async fn reconcile(
        &self,
        view: &mut ConversationView,
        thread_id: &str,
        turn_start: usize,
        text: &str,
    ) {
        let deadline = tokio::time::Instant::now() + self.reconcile_timeout;
        loop {
            match self.get_thread(thread_id).await {
                Ok(messages) if turn_committed(&messages, turn_start, text) => {
                    *view = ConversationView::new(messages);
                    return;
                }
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    warn!(thread_id, error = %err, "could not reload thread");
                    return;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(thread_id, "turn not committed yet, keeping local view");
                return;
            }
            tokio::time::sleep(RECONCILE_POLL).await;
        }
    }

    async fn open_stream(&self, thread_id: &str, text: &str) -> ClientResult<Response> {
        let response = self
            .client
            .post(self.url("/chat/stream"))
            .json(&ChatRequest {
                thread_id: thread_id.to_string(),
                message: text.to_string(),
            })
            .send()
            .await?;
        check_status(response).await
    }

    /// Read frames until a terminal frame, end of body, or cancellation.
    async fn consume(
        &self,
        view: &mut ConversationView,
        response: Response,
        cancel: &CancellationToken,
        on_token: &mut impl FnMut(&str),
    ) -> StreamOutcome {
        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamOutcome::Cancelled,
                chunk = body.next() => chunk,
            };

            let bytes = match chunk {
                Some(Ok(bytes)) => bytes,
                Some(Err(err)) => return StreamOutcome::Failed(err.to_string()),
                // Every stream ends with `done` or `error`; anything else
                // was cut off.
                None => {
                    return StreamOutcome::Failed(
                        "stream ended without a terminal frame".to_string(),
                    );
                }
            };

            for frame in decoder.push(&bytes) {
                match RelayFrame::parse(&frame.data) {
                    Some(RelayFrame::Token { token }) => {
                        on_token(&token);
                        update(view, ViewEvent::Token(token));
                    }
                    Some(RelayFrame::Done { .. }) => return StreamOutcome::Completed,
                    Some(RelayFrame::Error { error }) => return StreamOutcome::Failed(error),
                    None => debug!(data = %frame.data, "ignoring unrecognized frame"),
                }
            }
        }
    }
}

/// Whether `messages` holds the user message sent at `turn_start` followed
/// by a reply.
fn turn_committed(messages: &[Message], turn_start: usize, text: &str) -> bool {
    messages
        .get(turn_start)
        .is_some_and(|m| m.is_user() && m.content == text)
        && messages.get(turn_start + 1).is_some_and(Message::is_assistant)
}

fn update(view: &mut ConversationView, event: ViewEvent) {
    *view = apply(std::mem::take(view), event);
}

/// Turn a non-success response into [`ClientError::Server`].
async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ClientError::Server {
        status: status.as_u16(),
        message,
    })
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Protocol(e.to_string()))
}

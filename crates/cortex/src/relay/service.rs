//! Turn orchestration.

use std::sync::Arc;
use std::time::Duration;

use cortex_protocol::{ChatRequest, Message, RelayFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::session::{StreamSession, TurnOutcome, TurnReport, TurnState};
use super::{DisconnectPolicy, RelayConfig, RelayError, RelayResult};
use crate::thread::{StoreError, StoreResult, ThreadStore, now_millis};
use crate::title::TitleGenerator;
use crate::upstream::{CompletionBackend, UpstreamResult};

/// Frames buffered between the relay task and the client response.
const CLIENT_BUFFER: usize = 64;
/// Fragments buffered between the upstream reader and the relay loop.
const FRAGMENT_BUFFER: usize = 64;

const GENERATION_FAILED: &str = "Failed to generate a response";
const COMMIT_FAILED: &str = "Failed to save the conversation";

/// A running streamed turn.
pub struct RelayStream {
    /// Frames for the client; ends after the terminal frame.
    pub frames: mpsc::Receiver<RelayFrame>,
    /// Resolves once the turn has been committed.
    pub handle: JoinHandle<TurnReport>,
}

/// Coordinates the thread store, the completion service and the client for
/// each turn.
#[derive(Clone)]
pub struct RelayService {
    store: Arc<dyn ThreadStore>,
    upstream: Arc<dyn CompletionBackend>,
    titles: TitleGenerator,
    config: RelayConfig,
    /// Streamed turns still running, including ones whose client has left.
    turns: TaskTracker,
}

impl RelayService {
    pub fn new(
        store: Arc<dyn ThreadStore>,
        upstream: Arc<dyn CompletionBackend>,
        titles: TitleGenerator,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            upstream,
            titles,
            config,
            turns: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    /// Validate a chat request and load (or name) its thread.
    ///
    /// The returned session holds the thread history with the new user
    /// message appended. Nothing is written yet.
    pub async fn begin_turn(&self, request: &ChatRequest) -> RelayResult<StreamSession> {
        let thread_id = validate_thread_id(&request.thread_id)?;
        if request.message.trim().is_empty() {
            return Err(RelayError::Validation("message is required".to_string()));
        }

        let mut session = StreamSession::new(thread_id);
        session.transition(TurnState::AwaitingThread);

        match self.store.get_thread(thread_id).await? {
            Some(thread) => session.messages = thread.messages,
            None => {
                let title = self.titles.suggest(&request.message).await;
                debug!(thread_id, title = %title, "starting new thread");
                session.new_title = Some(title);
            }
        }
        session.messages.push(Message::user(request.message.clone()));
        Ok(session)
    }

    /// Validate a regenerate request and drop the reply being replaced.
    ///
    /// The thread must exist and contain at least one user message. The
    /// stored thread is untouched until the new reply commits.
    pub async fn begin_regeneration(&self, thread_id: &str) -> RelayResult<StreamSession> {
        let thread_id = validate_thread_id(thread_id)?;

        let mut session = StreamSession::new(thread_id);
        session.transition(TurnState::AwaitingThread);

        let thread = self
            .store
            .get_thread(thread_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(thread_id.to_string()))?;
        let mut messages = thread.messages;
        let replaced = if messages.last().is_some_and(Message::is_assistant) {
            messages.pop()
        } else {
            None
        };
        if !messages.iter().any(Message::is_user) {
            return Err(RelayError::Validation(
                "thread has no user message to answer".to_string(),
            ));
        }

        session.messages = messages;
        session.replaced = replaced;
        session.regenerating = true;
        Ok(session)
    }

    /// Blocking turn: one upstream request, one commit.
    pub async fn chat(&self, request: &ChatRequest) -> RelayResult<String> {
        let session = self.begin_turn(request).await?;
        self.complete(session).await
    }

    /// Blocking regeneration of the last reply.
    pub async fn regenerate(&self, thread_id: &str) -> RelayResult<String> {
        let session = self.begin_regeneration(thread_id).await?;
        self.complete(session).await
    }

    /// Run a prepared session in blocking mode.
    ///
    /// Upstream failures are already folded into the fallback reply, so the
    /// only error left is a failed commit.
    pub async fn complete(&self, mut session: StreamSession) -> RelayResult<String> {
        session.transition(TurnState::Streaming);
        let reply = self.upstream.complete(&session.messages).await;
        session.push_fragment(&reply);

        let assistant = self.commit(&mut session, TurnOutcome::Completed).await?;
        session.transition(TurnState::Done);
        Ok(assistant.unwrap_or(reply))
    }

    /// Drive a prepared session on a background task.
    pub fn spawn_stream(&self, session: StreamSession) -> RelayStream {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let relay = self.clone();
        let handle = self
            .turns
            .spawn(async move { relay.relay(session, tx).await });
        RelayStream { frames: rx, handle }
    }

    /// Number of streamed turns that have not committed yet.
    pub fn running_turns(&self) -> usize {
        self.turns.len()
    }

    /// Wait up to `grace` for running turns to commit.
    ///
    /// Returns `false` if some turn was still running when `grace` elapsed.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.turns.close();
        let drained = tokio::time::timeout(grace, self.turns.wait()).await.is_ok();
        self.turns.reopen();
        drained
    }

    /// Stream one turn to `client`, then commit it.
    ///
    /// The commit always runs, whatever happened upstream or to the client.
    /// It happens before the terminal frame is sent, so a client that sees
    /// `done` can immediately reload the thread.
    pub async fn relay(
        &self,
        mut session: StreamSession,
        client: mpsc::Sender<RelayFrame>,
    ) -> TurnReport {
        session.transition(TurnState::Streaming);
        let abort_on_disconnect = self.config.on_disconnect == DisconnectPolicy::Abort;
        let cancel = session.cancellation();
        let history = session.messages.clone();
        let mut client_connected = true;

        let (fragment_tx, mut fragment_rx) = mpsc::channel::<String>(FRAGMENT_BUFFER);
        let upstream_result: Option<UpstreamResult<String>> = {
            let upstream = self.upstream.stream(&history, fragment_tx);
            tokio::pin!(upstream);

            let mut finished: Option<UpstreamResult<String>> = None;
            let mut fragments_open = true;
            loop {
                if !fragments_open && finished.is_some() {
                    break finished;
                }

                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        info!(thread_id = %session.thread_id, "turn cancelled, stopping upstream");
                        break None;
                    }

                    _ = client.closed(), if client_connected => {
                        client_connected = false;
                        info!(
                            thread_id = %session.thread_id,
                            policy = ?self.config.on_disconnect,
                            "client disconnected mid-stream"
                        );
                        if abort_on_disconnect {
                            cancel.cancel();
                        }
                    }

                    fragment = fragment_rx.recv(), if fragments_open => match fragment {
                        Some(fragment) => {
                            session.push_fragment(&fragment);
                            if client_connected
                                && client.send(RelayFrame::token(fragment)).await.is_err()
                            {
                                client_connected = false;
                                if abort_on_disconnect {
                                    cancel.cancel();
                                }
                            }
                        }
                        None => fragments_open = false,
                    },

                    result = &mut upstream, if finished.is_none() => {
                        finished = Some(result);
                    }
                }
            }
        };

        let outcome = match &upstream_result {
            None => TurnOutcome::Cancelled,
            Some(Ok(_)) => TurnOutcome::Completed,
            Some(Err(err)) => {
                warn!(
                    thread_id = %session.thread_id,
                    fragments = session.fragments,
                    error = %err,
                    "upstream stream failed"
                );
                TurnOutcome::Failed
            }
        };

        let commit = self.commit(&mut session, outcome).await;
        let committed = commit.is_ok();
        let (terminal, final_state) = match (&commit, outcome) {
            (Err(err), _) => {
                error!(
                    thread_id = %session.thread_id,
                    client_connected,
                    error = %err,
                    "turn could not be committed"
                );
                (Some(RelayFrame::error(COMMIT_FAILED)), TurnState::Failed)
            }
            (Ok(_), TurnOutcome::Completed) => (Some(RelayFrame::done()), TurnState::Done),
            (Ok(_), TurnOutcome::Failed) => {
                (Some(RelayFrame::error(GENERATION_FAILED)), TurnState::Failed)
            }
            (Ok(_), TurnOutcome::Cancelled) => (None, TurnState::Done),
        };
        session.transition(final_state);

        if let Some(frame) = terminal
            && client_connected
            && client.send(frame).await.is_err()
        {
            client_connected = false;
            debug!(thread_id = %session.thread_id, "client left before the terminal frame");
        }

        info!(
            thread_id = %session.thread_id,
            outcome = ?outcome,
            fragments = session.fragments,
            chars = session.accumulator.chars().count(),
            committed,
            "turn finished"
        );

        TurnReport {
            thread_id: session.thread_id.clone(),
            outcome,
            state: session.state(),
            assistant: commit.ok().flatten(),
            committed,
            fragments: session.fragments,
            client_connected,
        }
    }

    /// Append the assistant reply (if any) and write the thread back.
    ///
    /// Returns the assistant text that was stored.
    async fn commit(
        &self,
        session: &mut StreamSession,
        outcome: TurnOutcome,
    ) -> StoreResult<Option<String>> {
        session.transition(TurnState::Committing);
        let assistant = session.assistant_text(outcome, self.upstream.fallback_message());
        match &assistant {
            Some(text) => session.messages.push(Message::assistant(text.clone())),
            // A regeneration that produced nothing has nothing to write; the
            // stored thread still holds the reply it would have replaced.
            None if session.regenerating => {
                session.restore_replaced();
                debug!(thread_id = %session.thread_id, "regeneration cancelled, thread unchanged");
                return Ok(None);
            }
            None => {}
        }
        self.write_thread(session).await?;
        Ok(assistant)
    }

    /// Write the session's message list, retrying transient failures.
    async fn write_thread(&self, session: &StreamSession) -> StoreResult<()> {
        let attempts = self.config.commit_attempts.max(1);
        let mut attempt = 1;
        loop {
            let timestamp = now_millis();
            let result = match &session.new_title {
                Some(title) => {
                    self.store
                        .create_thread(&session.thread_id, title, &session.messages, timestamp)
                        .await
                }
                None => {
                    self.store
                        .replace_messages(&session.thread_id, &session.messages, timestamp)
                        .await
                }
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err @ StoreError::NotFound(_)) => return Err(err),
                Err(err) if attempt >= attempts => return Err(err),
                Err(err) => {
                    warn!(
                        thread_id = %session.thread_id,
                        attempt,
                        error = %err,
                        "commit failed, retrying"
                    );
                    let backoff = self.config.commit_backoff_ms * u64::from(attempt);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn validate_thread_id(thread_id: &str) -> RelayResult<&str> {
    let trimmed = thread_id.trim();
    if trimmed.is_empty() {
        return Err(RelayError::Validation("threadId is required".to_string()));
    }
    Ok(trimmed)
}

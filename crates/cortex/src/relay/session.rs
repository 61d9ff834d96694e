//! Per-turn state.

use std::fmt;

use cortex_protocol::Message;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingThread,
    Streaming,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingThread => "awaiting_thread",
            Self::Streaming => "streaming",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How the upstream side of a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// State owned by a single turn.
///
/// Created by the relay once the thread is loaded, then moved into the task
/// that drives the stream. Nothing else holds a reference to it.
#[derive(Debug)]
pub struct StreamSession {
    pub(crate) thread_id: String,
    /// Title for a thread that does not exist yet.
    pub(crate) new_title: Option<String>,
    /// Thread history plus the pending user message.
    pub(crate) messages: Vec<Message>,
    /// Reply dropped from `messages` by a regeneration.
    pub(crate) replaced: Option<Message>,
    pub(crate) regenerating: bool,
    pub(crate) accumulator: String,
    pub(crate) fragments: usize,
    pub(crate) cancel: CancellationToken,
    state: TurnState,
}

impl StreamSession {
    pub(crate) fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            new_title: None,
            messages: Vec::new(),
            replaced: None,
            regenerating: false,
            accumulator: String::new(),
            fragments: 0,
            cancel: CancellationToken::new(),
            state: TurnState::Idle,
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Whether the turn will create the thread when it commits.
    pub fn is_new_thread(&self) -> bool {
        self.new_title.is_some()
    }

    /// Token that stops upstream consumption when cancelled.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn transition(&mut self, next: TurnState) {
        tracing::debug!(
            thread_id = %self.thread_id,
            from = %self.state,
            to = %next,
            "turn state change"
        );
        self.state = next;
    }

    /// Put the reply a regeneration dropped back at the end of `messages`.
    pub(crate) fn restore_replaced(&mut self) {
        if let Some(message) = self.replaced.take() {
            self.messages.push(message);
        }
    }

    pub(crate) fn push_fragment(&mut self, fragment: &str) {
        self.accumulator.push_str(fragment);
        self.fragments += 1;
    }

    /// Assistant text to commit for `outcome`, or `None` to commit only the
    /// user message.
    pub(crate) fn assistant_text(&self, outcome: TurnOutcome, fallback: &str) -> Option<String> {
        match outcome {
            TurnOutcome::Cancelled if self.accumulator.is_empty() => None,
            _ if self.accumulator.is_empty() => Some(fallback.to_string()),
            _ => Some(self.accumulator.clone()),
        }
    }
}

/// Summary of a finished turn, returned by the relay task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub thread_id: String,
    pub outcome: TurnOutcome,
    pub state: TurnState,
    /// Assistant text written to the store, if any.
    pub assistant: Option<String>,
    pub committed: bool,
    pub fragments: usize,
    /// Whether the client was still attached when the turn ended.
    pub client_connected: bool,
}

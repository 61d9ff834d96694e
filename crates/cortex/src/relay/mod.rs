//! Stream relay.
//!
//! Turns one user message into one assistant message. Fragments from the
//! completion service are forwarded to the client as they arrive and
//! accumulated; when upstream finishes (or fails, or the turn is cancelled)
//! the thread's full message list is written back exactly once.
//!
//! ```text
//! Idle -> AwaitingThread -> Streaming -> Committing -> Done
//!                                                  \-> Failed
//! ```

mod service;
mod session;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::thread::StoreError;

pub use service::{RelayService, RelayStream};
pub use session::{StreamSession, TurnOutcome, TurnReport, TurnState};

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors surfaced before a turn starts streaming, or by a blocking turn.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("thread not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// What to do with upstream once the client has gone away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectPolicy {
    /// Keep reading upstream and commit the complete answer.
    #[default]
    Continue,
    /// Stop reading upstream and commit whatever arrived so far.
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub on_disconnect: DisconnectPolicy,
    /// Store writes attempted per commit before giving up.
    pub commit_attempts: u32,
    /// Delay before retry `n` is `n * commit_backoff_ms`.
    pub commit_backoff_ms: u64,
    /// How long shutdown waits for running turns to commit.
    pub shutdown_grace_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            on_disconnect: DisconnectPolicy::Continue,
            commit_attempts: 3,
            commit_backoff_ms: 200,
            shutdown_grace_secs: 30,
        }
    }
}

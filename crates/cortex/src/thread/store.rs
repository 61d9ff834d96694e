//! Conversation store contract.

use async_trait::async_trait;
use cortex_protocol::{Message, ThreadSummary};
use thiserror::Error;

use super::models::Thread;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Thread does not exist.
    #[error("thread not found: {0}")]
    NotFound(String),

    /// Stored data could not be interpreted.
    #[error("corrupt thread data: {0}")]
    Corrupt(String),

    /// Database backend error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable, ordered message log keyed by thread id.
///
/// Writes replace a thread's full message list in one atomic step. Two turns
/// racing on the same thread id resolve as last-writer-wins.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Load a thread with all of its messages.
    async fn get_thread(&self, thread_id: &str) -> StoreResult<Option<Thread>>;

    /// Create a thread with an initial message list. An existing thread with
    /// the same id keeps its title and has its messages replaced.
    async fn create_thread(
        &self,
        thread_id: &str,
        title: &str,
        messages: &[Message],
        timestamp: i64,
    ) -> StoreResult<()>;

    /// Replace the message list of an existing thread and bump its
    /// last-modified timestamp.
    async fn replace_messages(
        &self,
        thread_id: &str,
        messages: &[Message],
        timestamp: i64,
    ) -> StoreResult<()>;

    /// All threads, most recently modified first.
    async fn list_threads(&self) -> StoreResult<Vec<ThreadSummary>>;

    /// Returns `false` when the thread did not exist.
    async fn delete_thread(&self, thread_id: &str) -> StoreResult<bool>;

    /// Returns `None` when the thread did not exist.
    async fn rename_thread(
        &self,
        thread_id: &str,
        title: &str,
        timestamp: i64,
    ) -> StoreResult<Option<ThreadSummary>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::NotFound("abc".to_string());
        assert_eq!(err.to_string(), "thread not found: abc");
    }
}

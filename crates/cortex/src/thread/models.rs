//! Thread data models.

use cortex_protocol::{Message, Role, ThreadSummary};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::store::StoreError;

/// A persisted conversation with its full message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub title: String,
    pub messages: Vec<Message>,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub updated_at: i64,
}

impl Thread {
    pub fn summary(&self) -> ThreadSummary {
        ThreadSummary {
            thread_id: self.thread_id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            message_count: self.messages.len() as i64,
        }
    }
}

/// Row of the `threads` table joined with its message count.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ThreadRow {
    pub thread_id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub message_count: i64,
}

impl From<ThreadRow> for ThreadSummary {
    fn from(row: ThreadRow) -> Self {
        ThreadSummary {
            thread_id: row.thread_id,
            title: row.title,
            created_at: row.created_at,
            updated_at: row.updated_at,
            message_count: row.message_count,
        }
    }
}

/// Row of the `messages` table.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct MessageRow {
    pub role: String,
    pub content: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role: Role = row.role.parse().map_err(StoreError::Corrupt)?;
        Ok(Message::new(role, row.content))
    }
}

//! Conversation store.
//!
//! Threads are persisted as a header row plus an ordered list of message rows.
//! The relay only ever writes a thread's complete message list, once per turn.

mod models;
mod repository;
mod store;

pub use models::Thread;
pub use repository::SqliteThreadStore;
pub use store::{StoreError, StoreResult, ThreadStore};

/// Current time as Unix milliseconds, the unit every thread timestamp uses.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

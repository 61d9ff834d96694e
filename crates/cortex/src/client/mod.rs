//! Stream consumer.
//!
//! Client-side counterpart of the relay: a pure reducer that keeps a local
//! view of a thread consistent with the frames it receives, and an HTTP
//! client that drives it.

mod consumer;
mod error;
pub mod reducer;

pub use consumer::{ChatClient, StreamOutcome, TurnSummary};
pub use error::{ClientError, ClientResult};
pub use reducer::{ConversationView, ViewEvent, apply};

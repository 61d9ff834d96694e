//! API request handlers, organized by domain:
//! - `chat`: blocking and streamed turns, regeneration
//! - `threads`: thread listing and management
//! - `misc`: health check

mod chat;
mod misc;
mod threads;

pub use chat::{chat, chat_stream, regenerate, regenerate_stream};
pub use misc::health;
pub use threads::{delete_thread, get_thread, list_threads, rename_thread};

//! Wire types for Cortex conversation streaming.
//!
//! This crate defines the shapes exchanged across the two streaming boundaries:
//!
//! ```text
//! Client <--[HTTP JSON + event stream: RelayFrame]--> Relay <--[event stream]--> Completion API
//! ```
//!
//! Both boundaries use the same line-oriented `data:` framing, so the
//! [`FrameDecoder`] lives here and is shared by the relay's upstream client and
//! by the client-side stream consumer.
//!
//! ## Design Principles
//!
//! 1. **Messages are persistent, frames are ephemeral.** A thread's messages are
//!    committed once per turn. Frames only drive rendering.
//! 2. **One terminal frame.** Every relay stream ends with exactly one `done` or
//!    `error` frame.
//! 3. **Decoding never aborts on bad input.** Malformed frames are skipped.

pub mod api;
pub mod frames;
pub mod framing;
pub mod messages;

pub use api::{
    ChatRequest, DeleteResponse, ErrorBody, HealthResponse, RegenerateRequest, RenameRequest,
    ReplyResponse,
};
pub use frames::RelayFrame;
pub use framing::{Frame, FrameDecoder};
pub use messages::{Message, Role, ThreadSummary};

/// Assistant text used when a reply could not be generated.
pub const FALLBACK_MESSAGE: &str = "Sorry, something went wrong while generating the response.";

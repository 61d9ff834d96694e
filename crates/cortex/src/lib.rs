//! Cortex: a streaming chat relay.
//!
//! The server takes one user message per turn, forwards the conversation to
//! an OpenAI-compatible completion service, streams the reply back to the
//! client as it is generated, and persists the finished turn to a SQLite
//! thread store. The `client` module is the matching consumer.

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod relay;
pub mod thread;
pub mod title;
pub mod upstream;

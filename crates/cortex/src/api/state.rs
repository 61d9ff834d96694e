//! Application state shared across handlers.

use std::sync::Arc;

use crate::relay::RelayService;
use crate::thread::ThreadStore;

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Turn orchestration.
    pub relay: RelayService,
    /// Direct store access for thread management routes.
    pub threads: Arc<dyn ThreadStore>,
    /// CORS origins; empty means the local development defaults.
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn new(relay: RelayService, allowed_origins: Vec<String>) -> Self {
        let threads = relay.store().clone();
        Self {
            relay,
            threads,
            allowed_origins,
        }
    }
}

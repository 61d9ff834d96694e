//! HTTP API module.
//!
//! REST endpoints for chat turns and thread management, all under `/api`.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;

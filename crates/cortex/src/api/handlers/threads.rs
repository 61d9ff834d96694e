//! Thread management handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use cortex_protocol::{DeleteResponse, Message, RenameRequest, ThreadSummary};
use tracing::{info, instrument};

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::thread::now_millis;

/// List threads, most recently modified first.
#[instrument(skip(state))]
pub async fn list_threads(State(state): State<AppState>) -> ApiResult<Json<Vec<ThreadSummary>>> {
    let threads = state.threads.list_threads().await?;
    Ok(Json(threads))
}

/// Messages of one thread, in order.
#[instrument(skip(state))]
pub async fn get_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    let thread = state
        .threads
        .get_thread(&thread_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("thread {thread_id}")))?;
    Ok(Json(thread.messages))
}

#[instrument(skip(state, payload))]
pub async fn rename_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    payload: Result<Json<RenameRequest>, JsonRejection>,
) -> ApiResult<Json<ThreadSummary>> {
    let Json(request) = payload?;
    let title = request.title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("title is required"));
    }

    let summary = state
        .threads
        .rename_thread(&thread_id, title, now_millis())
        .await?
        .ok_or_else(|| ApiError::not_found(format!("thread {thread_id}")))?;
    Ok(Json(summary))
}

#[instrument(skip(state))]
pub async fn delete_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    if !state.threads.delete_thread(&thread_id).await? {
        return Err(ApiError::not_found(format!("thread {thread_id}")));
    }
    info!(thread_id = %thread_id, "thread deleted");
    Ok(Json(DeleteResponse {
        success: "Thread deleted successfully".to_string(),
    }))
}

//! Chat turn handlers.
//!
//! Streaming endpoints validate the request and load the thread before the
//! event stream opens, so those failures are ordinary JSON errors. Once the
//! stream is open, failures arrive as an `error` frame.

use std::convert::Infallible;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::sse::{Event, KeepAlive, Sse},
};
use cortex_protocol::{ChatRequest, RegenerateRequest, ReplyResponse};
use futures::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::instrument;

use crate::api::error::ApiResult;
use crate::api::state::AppState;
use crate::relay::RelayStream;

/// Run a blocking turn.
#[instrument(skip(state, payload))]
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ReplyResponse>> {
    let Json(request) = payload?;
    let reply = state.relay.chat(&request).await?;
    Ok(Json(ReplyResponse { reply }))
}

/// Run a streamed turn.
#[instrument(skip(state, payload))]
pub async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(request) = payload?;
    let session = state.relay.begin_turn(&request).await?;
    Ok(event_stream(state.relay.spawn_stream(session)))
}

/// Replace the last assistant reply, blocking.
#[instrument(skip(state, payload))]
pub async fn regenerate(
    State(state): State<AppState>,
    payload: Result<Json<RegenerateRequest>, JsonRejection>,
) -> ApiResult<Json<ReplyResponse>> {
    let Json(request) = payload?;
    let reply = state.relay.regenerate(&request.thread_id).await?;
    Ok(Json(ReplyResponse { reply }))
}

/// Replace the last assistant reply, streamed.
#[instrument(skip(state, payload))]
pub async fn regenerate_stream(
    State(state): State<AppState>,
    payload: Result<Json<RegenerateRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(request) = payload?;
    let session = state.relay.begin_regeneration(&request.thread_id).await?;
    Ok(event_stream(state.relay.spawn_stream(session)))
}

/// Serve a running turn's frames as server-sent events.
fn event_stream(stream: RelayStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // The relay task runs to its commit on its own; the relay's task tracker
    // keeps account of it once the handle is dropped.
    let RelayStream { frames, handle: _ } = stream;
    let events = ReceiverStream::new(frames)
        .map(|frame| Ok::<_, Infallible>(Event::default().data(frame.to_data())));
    Sse::new(events).keep_alive(KeepAlive::default())
}

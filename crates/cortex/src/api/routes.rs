//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;

/// Origins allowed when none are configured.
const DEV_ORIGINS: [&str; 4] = [
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.allowed_origins);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let api = Router::new()
        .route("/health", get(handlers::health))
        .route("/chat", post(handlers::chat))
        .route("/chat/stream", post(handlers::chat_stream))
        .route("/chat/regenerate", post(handlers::regenerate))
        .route("/chat/regenerate/stream", post(handlers::regenerate_stream))
        .route("/thread", get(handlers::list_threads))
        .route(
            "/thread/{thread_id}",
            get(handlers::get_thread)
                .patch(handlers::rename_thread)
                .delete(handlers::delete_thread),
        )
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(trace_layer)
        .layer(cors)
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION];

    let origins: Vec<HeaderValue> = if allowed_origins.is_empty() {
        tracing::warn!("CORS: No origins configured, using default localhost origins");
        DEV_ORIGINS.into_iter().map(HeaderValue::from_static).collect()
    } else {
        allowed_origins
            .iter()
            .filter_map(|origin| {
                origin.parse::<HeaderValue>().ok().or_else(|| {
                    tracing::warn!("CORS: Invalid origin in config: {}", origin);
                    None
                })
            })
            .collect()
    };

    if origins.is_empty() {
        tracing::error!("CORS: All configured origins are invalid!");
        return CorsLayer::new().allow_origin(AllowOrigin::exact(HeaderValue::from_static("null")));
    }

    tracing::info!("CORS: Allowing {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
}

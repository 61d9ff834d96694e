//! API integration tests.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use common::{TestApp, UpstreamScript, test_app};
use cortex_protocol::{FALLBACK_MESSAGE, FrameDecoder, Message, RelayFrame};
use serde_json::{Value, json};
use tower::ServiceExt;

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn body_frames(response: Response) -> Vec<RelayFrame> {
    let bytes = body_bytes(response).await;
    let mut decoder = FrameDecoder::new();
    decoder
        .push(&bytes)
        .into_iter()
        .chain(decoder.finish())
        .filter_map(|frame| RelayFrame::parse(&frame.data))
        .collect()
}

async fn seed(app: &TestApp, thread_id: &str, messages: &[Message]) {
    app.store
        .create_thread(thread_id, "Seeded", messages, 1_000)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app(UpstreamScript::default()).await;

    let response = send(&app, "GET", "/api/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_blocking_chat_creates_titled_thread() {
    let app = test_app(UpstreamScript::default()).await;

    let response = send(
        &app,
        "POST",
        "/api/chat",
        Some(json!({"threadId": "t1", "message": "Hello"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"reply": "Hey!"}));

    let thread = app.thread("t1").await.unwrap();
    assert_eq!(thread.title, "Friendly Greeting");
    assert_eq!(
        thread.messages,
        vec![Message::user("Hello"), Message::assistant("Hey!")]
    );

    let response = send(&app, "GET", "/api/thread", None).await;
    let listed = body_json(response).await;
    assert_eq!(listed[0]["threadId"], "t1");
    assert_eq!(listed[0]["title"], "Friendly Greeting");
    assert_eq!(listed[0]["messageCount"], 2);
}

#[tokio::test]
async fn test_blocking_chat_returns_fallback_when_upstream_fails() {
    let app = test_app(UpstreamScript {
        fail_status: Some(503),
        ..Default::default()
    })
    .await;

    let response = send(
        &app,
        "POST",
        "/api/chat",
        Some(json!({"threadId": "t1", "message": "Hello"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["reply"], FALLBACK_MESSAGE);

    let thread = app.thread("t1").await.unwrap();
    assert_eq!(thread.title, "New Chat");
    assert_eq!(thread.messages[1], Message::assistant(FALLBACK_MESSAGE));
}

#[tokio::test]
async fn test_chat_validation() {
    let app = test_app(UpstreamScript::default()).await;

    for body in [
        json!({"threadId": "t1", "message": "   "}),
        json!({"message": "Hello"}),
        json!({"threadId": "t1"}),
    ] {
        let response = send(&app, "POST", "/api/chat", Some(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
    }
    assert!(app.thread("t1").await.is_none());
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = test_app(UpstreamScript::default()).await;

    let request = Request::builder()
        .uri("/api/chat")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_emits_tokens_then_done() {
    let app = test_app(UpstreamScript::default()).await;

    let response = send(
        &app,
        "POST",
        "/api/chat/stream",
        Some(json!({"threadId": "t1", "message": "Hello"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));

    let frames = body_frames(response).await;
    assert_eq!(
        frames,
        vec![
            RelayFrame::token("Hi"),
            RelayFrame::token(" there"),
            RelayFrame::token("!"),
            RelayFrame::done(),
        ]
    );

    // The commit happens before the terminal frame is sent.
    let thread = app.thread("t1").await.unwrap();
    assert_eq!(
        thread.messages,
        vec![Message::user("Hello"), Message::assistant("Hi there!")]
    );
}

#[tokio::test]
async fn test_stream_appends_to_existing_thread() {
    let app = test_app(UpstreamScript::default()).await;
    seed(
        &app,
        "t1",
        &[Message::user("Hello"), Message::assistant("Hi there!")],
    )
    .await;

    let response = send(
        &app,
        "POST",
        "/api/chat/stream",
        Some(json!({"threadId": "t1", "message": "And again"})),
    )
    .await;
    let frames = body_frames(response).await;
    assert_eq!(frames.last(), Some(&RelayFrame::done()));

    let thread = app.thread("t1").await.unwrap();
    assert_eq!(thread.title, "Seeded");
    assert_eq!(thread.messages.len(), 4);
    assert_eq!(thread.messages[2], Message::user("And again"));
    assert!(thread.updated_at > 1_000);
}

#[tokio::test]
async fn test_stream_upstream_failure_keeps_partial_text() {
    let app = test_app(UpstreamScript {
        fragments: vec!["Par"],
        fail_after: true,
        ..Default::default()
    })
    .await;

    let response = send(
        &app,
        "POST",
        "/api/chat/stream",
        Some(json!({"threadId": "t1", "message": "Hello"})),
    )
    .await;
    let frames = body_frames(response).await;
    assert_eq!(frames.first(), Some(&RelayFrame::token("Par")));
    assert!(matches!(frames.last(), Some(RelayFrame::Error { .. })));
    assert!(!frames.contains(&RelayFrame::done()));

    let thread = app.thread("t1").await.unwrap();
    assert_eq!(thread.messages[1], Message::assistant("Par"));
}

#[tokio::test]
async fn test_stream_validation_fails_before_stream_opens() {
    let app = test_app(UpstreamScript::default()).await;

    let response = send(
        &app,
        "POST",
        "/api/chat/stream",
        Some(json!({"threadId": "t1", "message": ""})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    assert_eq!(
        app.upstream.streams.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn test_regenerate_replaces_last_reply() {
    let app = test_app(UpstreamScript::default()).await;
    seed(
        &app,
        "t1",
        &[Message::user("Hello"), Message::assistant("Hi there!")],
    )
    .await;

    let response = send(
        &app,
        "POST",
        "/api/chat/regenerate",
        Some(json!({"threadId": "t1"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["reply"], "Hey!");

    let thread = app.thread("t1").await.unwrap();
    assert_eq!(
        thread.messages,
        vec![Message::user("Hello"), Message::assistant("Hey!")]
    );
}

#[tokio::test]
async fn test_regenerate_stream_replaces_last_reply() {
    let app = test_app(UpstreamScript {
        fragments: vec!["He", "y!"],
        ..Default::default()
    })
    .await;
    seed(
        &app,
        "t1",
        &[Message::user("Hello"), Message::assistant("Hi there!")],
    )
    .await;

    let response = send(
        &app,
        "POST",
        "/api/chat/regenerate/stream",
        Some(json!({"threadId": "t1"})),
    )
    .await;
    let frames = body_frames(response).await;
    assert_eq!(
        frames,
        vec![
            RelayFrame::token("He"),
            RelayFrame::token("y!"),
            RelayFrame::done()
        ]
    );

    let thread = app.thread("t1").await.unwrap();
    assert_eq!(thread.messages.len(), 2);
    assert_eq!(thread.messages[1], Message::assistant("Hey!"));
}

#[tokio::test]
async fn test_regenerate_errors() {
    let app = test_app(UpstreamScript::default()).await;

    let response = send(
        &app,
        "POST",
        "/api/chat/regenerate",
        Some(json!({"threadId": "missing"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(
        &app,
        "POST",
        "/api/chat/regenerate/stream",
        Some(json!({"threadId": "missing"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, "POST", "/api/chat/regenerate", Some(json!({}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    seed(&app, "empty", &[]).await;
    let response = send(
        &app,
        "POST",
        "/api/chat/regenerate",
        Some(json!({"threadId": "empty"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.thread("empty").await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn test_get_thread() {
    let app = test_app(UpstreamScript::default()).await;
    seed(
        &app,
        "t1",
        &[Message::user("Hello"), Message::assistant("Hi there!")],
    )
    .await;

    let response = send(&app, "GET", "/api/thread/t1", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!([
            {"role": "user", "content": "Hello"},
            {"role": "assistant", "content": "Hi there!"}
        ])
    );

    let response = send(&app, "GET", "/api/thread/missing", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_threads_most_recent_first() {
    let app = test_app(UpstreamScript::default()).await;
    app.store
        .create_thread("old", "Old", &[Message::user("a")], 1_000)
        .await
        .unwrap();
    app.store
        .create_thread("new", "New", &[Message::user("b")], 2_000)
        .await
        .unwrap();

    let response = send(&app, "GET", "/api/thread", None).await;
    let listed = body_json(response).await;
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["threadId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["new", "old"]);
}

#[tokio::test]
async fn test_rename_thread() {
    let app = test_app(UpstreamScript::default()).await;
    seed(&app, "t1", &[Message::user("Hello")]).await;

    let response = send(
        &app,
        "PATCH",
        "/api/thread/t1",
        Some(json!({"title": "  Greetings  "})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["title"], "Greetings");
    assert_eq!(json["threadId"], "t1");
    assert_eq!(app.thread("t1").await.unwrap().title, "Greetings");

    let response = send(&app, "PATCH", "/api/thread/t1", Some(json!({"title": " "}))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        "PATCH",
        "/api/thread/missing",
        Some(json!({"title": "x"})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_thread() {
    let app = test_app(UpstreamScript::default()).await;
    seed(&app, "t1", &[Message::user("Hello")]).await;

    let response = send(&app, "DELETE", "/api/thread/t1", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"success": "Thread deleted successfully"})
    );
    assert!(app.thread("t1").await.is_none());

    let response = send(&app, "DELETE", "/api/thread/t1", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

//! Test utilities and common setup.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::{Json, Router, routing::post};
use cortex::api::{AppState, create_router};
use cortex::db::Database;
use cortex::relay::{DisconnectPolicy, RelayConfig, RelayService};
use cortex::thread::{SqliteThreadStore, Thread, ThreadStore};
use cortex::title::{TitleConfig, TitleGenerator};
use cortex::upstream::{CompletionBackend, CompletionClient, UpstreamConfig};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// Behaviour of the fake completion service.
#[derive(Debug, Clone)]
pub struct UpstreamScript {
    /// Streamed fragments, in order.
    pub fragments: Vec<&'static str>,
    /// Delay before each streamed fragment.
    pub delay_ms: u64,
    /// Break the connection after the last fragment instead of finishing.
    pub fail_after: bool,
    /// Answer every request with this status and an error envelope.
    pub fail_status: Option<u16>,
    /// Whole reply for blocking requests.
    pub reply: &'static str,
    pub title: &'static str,
}

impl Default for UpstreamScript {
    fn default() -> Self {
        Self {
            fragments: vec!["Hi", " there", "!"],
            delay_ms: 0,
            fail_after: false,
            fail_status: None,
            reply: "Hey!",
            title: "\"Friendly Greeting\"",
        }
    }
}

/// A running fake completion service.
pub struct FakeUpstream {
    pub base_url: String,
    /// Number of streaming requests received.
    pub streams: Arc<AtomicUsize>,
}

pub async fn spawn_upstream(script: UpstreamScript) -> FakeUpstream {
    let streams = Arc::new(AtomicUsize::new(0));
    let counter = streams.clone();

    let router = Router::new().route(
        "/chat/completions",
        post(move |Json(body): Json<Value>| {
            let script = script.clone();
            let counter = counter.clone();
            async move { completion(script, counter, body) }
        }),
    );

    FakeUpstream {
        base_url: spawn_server(router).await,
        streams,
    }
}

fn completion(
    script: UpstreamScript,
    streams: Arc<AtomicUsize>,
    body: Value,
) -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    if let Some(status) = script.fail_status {
        let status = StatusCode::from_u16(status).unwrap();
        let envelope = json!({"error": {"message": "model overloaded", "type": "server_error"}});
        return (status, Json(envelope)).into_response();
    }

    let first = body["messages"][0]["content"].as_str().unwrap_or_default();
    if first.starts_with("Generate a short 5-word title") {
        return Json(reply_body(script.title)).into_response();
    }
    if body["stream"] != json!(true) {
        return Json(reply_body(script.reply)).into_response();
    }

    streams.fetch_add(1, Ordering::SeqCst);
    let delay = Duration::from_millis(script.delay_ms);
    let mut parts: Vec<Result<Bytes, std::io::Error>> = script
        .fragments
        .iter()
        .map(|fragment| {
            let chunk = json!({"choices": [{"index": 0, "delta": {"content": fragment}}]});
            Ok(Bytes::from(format!("data: {chunk}\n\n")))
        })
        .collect();
    if script.fail_after {
        parts.push(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "upstream went away",
        )));
    } else {
        parts.push(Ok(Bytes::from_static(b"data: [DONE]\n\n")));
    }

    let stream = futures::stream::iter(parts).then(move |part| async move {
        tokio::time::sleep(delay.max(Duration::from_millis(5))).await;
        part
    });
    Body::from_stream(stream).into_response()
}

fn reply_body(content: &str) -> Value {
    json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]})
}

/// Serve `router` on an ephemeral local port; returns its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Router plus handles for inspecting what it stored.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<dyn ThreadStore>,
    pub upstream: FakeUpstream,
    _db: Database,
}

impl TestApp {
    pub async fn thread(&self, thread_id: &str) -> Option<Thread> {
        self.store.get_thread(thread_id).await.unwrap()
    }

    /// Wait for a background commit to land.
    pub async fn wait_for_thread(&self, thread_id: &str) -> Thread {
        for _ in 0..200 {
            if let Some(thread) = self.thread(thread_id).await {
                return thread;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("thread {thread_id} was never committed");
    }
}

pub async fn test_app(script: UpstreamScript) -> TestApp {
    test_app_with(script, DisconnectPolicy::Continue).await
}

/// Create a test application over an in-memory database and a fake
/// completion service.
pub async fn test_app_with(script: UpstreamScript, on_disconnect: DisconnectPolicy) -> TestApp {
    let db = Database::in_memory().await.unwrap();
    let store: Arc<dyn ThreadStore> = Arc::new(SqliteThreadStore::new(db.pool().clone()));

    let upstream = spawn_upstream(script).await;
    let client = CompletionClient::new(UpstreamConfig {
        base_url: upstream.base_url.clone(),
        api_key: Some("test-key".to_string()),
        ..Default::default()
    })
    .unwrap();
    let backend: Arc<dyn CompletionBackend> = Arc::new(client);

    let titles = TitleGenerator::new(backend.clone(), TitleConfig::default());
    let relay = RelayService::new(
        store.clone(),
        backend,
        titles,
        RelayConfig {
            on_disconnect,
            commit_backoff_ms: 10,
            ..Default::default()
        },
    );
    let router = create_router(AppState::new(relay, Vec::new()));

    TestApp {
        router,
        store,
        upstream,
        _db: db,
    }
}

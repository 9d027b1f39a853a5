//! Inference client against a local relay stand-in.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use dialog_harness::cache::DatasetCache;
use dialog_harness::checkpoint::MemoryCheckpointStore;
use dialog_harness::config::DbConfig;
use dialog_harness::fetch::Fetcher;
use dialog_harness::inference::{InferenceClient, InferenceError, RetryPolicy};
use dialog_harness::ingest::IngestError;
use dialog_harness::server::{router, AppState};
use dialog_harness::staleness::SystemClock;
use dialog_harness::userdata::UserStore;

#[derive(Clone, Default)]
struct Relay {
    replies: Arc<Mutex<VecDeque<(u16, Value)>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl Relay {
    async fn start(replies: Vec<(u16, Value)>) -> (Self, String) {
        let relay = Relay {
            replies: Arc::new(Mutex::new(replies.into())),
            requests: Arc::default(),
        };
        let app = Router::new()
            .route("/", post(reply))
            .with_state(relay.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (relay, url)
    }

    fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

async fn reply(State(relay): State<Relay>, Json(body): Json<Value>) -> Response {
    relay.requests.lock().unwrap().push(body);
    let next = relay.replies.lock().unwrap().pop_front();
    match next {
        Some((status, body)) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(body),
        )
            .into_response(),
        None => StatusCode::GONE.into_response(),
    }
}

fn chat(content: &str) -> (u16, Value) {
    (200, json!({"choices": [{"message": {"content": content}}]}))
}

fn client(url: &str, max_retries: u32) -> InferenceClient {
    let policy = RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(5),
    };
    InferenceClient::new(url, policy, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn retries_server_errors_then_succeeds() {
    let (relay, url) = Relay::start(vec![
        (503, json!({"error": "busy"})),
        (503, json!({"error": "busy"})),
        chat("Score: 9/10"),
    ])
    .await;

    let result = client(&url, 3)
        .check_translation("我要一杯咖啡", "I want a cup of coffee")
        .await
        .unwrap();
    assert_eq!(result, "Score: 9/10");

    let requests = relay.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0]["endpoint"], "chat");
    assert_eq!(requests[0]["original"], "我要一杯咖啡");
    assert_eq!(requests[0]["translation"], "I want a cup of coffee");
}

#[tokio::test]
async fn client_errors_fail_fast() {
    let (relay, url) = Relay::start(vec![(400, json!({"error": "bad input"})), chat("unused")]).await;

    let err = client(&url, 3)
        .check_translation("a", "b")
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::Status { status: 400, .. }));
    assert!(!err.is_retryable());
    assert_eq!(relay.requests().len(), 1);
}

#[tokio::test]
async fn gives_up_after_max_retries() {
    let (relay, url) = Relay::start(vec![
        (500, json!({})),
        (500, json!({})),
        (500, json!({})),
    ])
    .await;

    let err = client(&url, 2).check_translation("a", "b").await.unwrap_err();
    assert!(matches!(err, InferenceError::Status { status: 500, .. }));
    assert_eq!(relay.requests().len(), 3);
}

#[tokio::test]
async fn transcription_sends_base64_and_reads_text() {
    let (relay, url) = Relay::start(vec![(200, json!({"text": "你好"}))]).await;

    let text = client(&url, 0)
        .transcribe_audio(b"RIFF", Some("zh"), None)
        .await
        .unwrap();
    assert_eq!(text, "你好");

    let request = &relay.requests()[0];
    assert_eq!(request["endpoint"], "transcription");
    assert_eq!(request["audio"], "UklGRg==");
    assert_eq!(request["language"], "zh");
    assert!(request.get("prompt").is_none());
}

#[tokio::test]
async fn missing_answer_is_malformed() {
    let (_relay, url) = Relay::start(vec![(200, json!({"choices": []}))]).await;

    let err = client(&url, 0)
        .note_suggestions("orig", "trans", "", "")
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::Malformed(_)));
}

struct NoDataset;

#[async_trait]
impl Fetcher for NoDataset {
    async fn fetch(&self) -> Result<Vec<u8>, IngestError> {
        Err(IngestError::Transport("offline".into()))
    }
}

async fn app(relay_url: &str) -> (Router, TempDir) {
    let tmp = TempDir::new().unwrap();
    let store = UserStore::open(&DbConfig {
        path: tmp.path().join("state.sqlite"),
    })
    .await
    .unwrap();
    let cache = DatasetCache::new(
        Arc::new(NoDataset),
        Arc::new(MemoryCheckpointStore::default()),
        Arc::new(SystemClock),
    );
    let inference = Arc::new(client(relay_url, 0));
    (router(AppState::new(Arc::new(cache), store, Some(inference))), tmp)
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn api_routes_relay_answers() {
    let (relay, url) = Relay::start(vec![chat("Looks good"), chat("- add a measure word")]).await;
    let (app, _tmp) = app(&url).await;

    let (status, body) = post_json(
        &app,
        "/inference/check-translation",
        json!({"original": "你好", "translation": "hello"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "Looks good");

    let (status, body) = post_json(
        &app,
        "/inference/note-suggestions",
        json!({"originalText": "一杯咖啡", "translationText": "a coffee", "currentNoteText": "cup?"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "- add a measure word");

    let requests = relay.requests();
    assert_eq!(requests[1]["endpoint"], "noteSuggestions");
    assert_eq!(requests[1]["currentNoteText"], "cup?");
    assert_eq!(requests[1]["aiCheckResult"], "");
}

#[tokio::test]
async fn api_maps_relay_failure_to_bad_gateway() {
    let (_relay, url) = Relay::start(vec![(401, json!({"error": "no key"}))]).await;
    let (app, _tmp) = app(&url).await;

    let (status, body) = post_json(
        &app,
        "/inference/smart-completion",
        json!({"originalText": "a", "translationText": "b", "currentInput": "c"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "inference_failed");
}

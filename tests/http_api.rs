//! HTTP API behaviour through the router, without binding a port.

mod support;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use dialog_harness::cache::DatasetCache;
use dialog_harness::checkpoint::MemoryCheckpointStore;
use dialog_harness::config::DbConfig;
use dialog_harness::fetch::Fetcher;
use dialog_harness::ingest::IngestError;
use dialog_harness::server::{router, AppState};
use dialog_harness::staleness::SystemClock;
use dialog_harness::userdata::UserStore;
use support::dialog_workbook;

struct StaticFetcher(Result<Vec<u8>, IngestError>);

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self) -> Result<Vec<u8>, IngestError> {
        self.0.clone()
    }
}

async fn app_with(fetched: Result<Vec<u8>, IngestError>) -> (Router, TempDir) {
    let tmp = TempDir::new().unwrap();
    let store = UserStore::open(&DbConfig {
        path: tmp.path().join("state.sqlite"),
    })
    .await
    .unwrap();
    let cache = DatasetCache::new(
        Arc::new(StaticFetcher(fetched)),
        Arc::new(MemoryCheckpointStore::default()),
        Arc::new(SystemClock),
    );
    (router(AppState::new(Arc::new(cache), store, None)), tmp)
}

async fn app() -> (Router, TempDir) {
    app_with(Ok(dialog_workbook(&[("Q1", "1"), ("Q2", "2"), ("Q1", "3")]))).await
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health() {
    let (app, _tmp) = app().await;
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn dataset_status_before_and_after_load() {
    let (app, _tmp) = app().await;
    let (_, before) = send(&app, "GET", "/dataset", None, None).await;
    assert_eq!(before["loaded"], false);
    assert_eq!(before["row_count"], 0);

    let (status, load) = send(&app, "POST", "/dataset/load", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(load["outcome"], "loaded");
    assert_eq!(load["rows"], 3);
    assert_eq!(load["groups"], 2);
    assert_eq!(load["dataset"]["loaded"], true);

    let (_, again) = send(&app, "POST", "/dataset/load", None, Some(json!({}))).await;
    assert_eq!(again["outcome"], "cache_hit");

    let (_, forced) = send(
        &app,
        "POST",
        "/dataset/load",
        None,
        Some(json!({"force": true})),
    )
    .await;
    assert_eq!(forced["outcome"], "loaded");

    let (_, refreshed) = send(&app, "POST", "/dataset/refresh", None, None).await;
    assert_eq!(refreshed["outcome"], "loaded");
}

#[tokio::test]
async fn dialogs_are_grouped_in_order() {
    let (app, _tmp) = app().await;
    let (status, body) = send(&app, "GET", "/dialogs", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let groups = body["groups"].as_array().unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0]["qid"], "Q1");
    assert_eq!(groups[0]["rows"], 2);
    assert_eq!(groups[1]["qid"], "Q2");

    let (status, body) = send(&app, "GET", "/dialogs/Q1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1]["id"], "3");

    let (status, body) = send(&app, "GET", "/dialogs/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn failed_ingest_is_reported_as_unavailable() {
    let (app, _tmp) = app_with(Err(IngestError::Status {
        status: 403,
        url: "https://bucket/excel/output_filled.xlsx".into(),
    }))
    .await;

    let (status, body) = send(&app, "GET", "/dialogs", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "dataset_unavailable");
    assert!(body["error"]["message"].as_str().unwrap().contains("403"));

    let (_, status_body) = send(&app, "GET", "/dataset", None, None).await;
    assert_eq!(status_body["loaded"], false);
    assert_eq!(status_body["is_refreshing"], false);
    assert_eq!(status_body["error"]["kind"], "fetch");
}

#[tokio::test]
async fn user_routes_require_identity() {
    let (app, _tmp) = app().await;
    let (status, body) = send(&app, "GET", "/me/favorites", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");

    let (status, _) = send(&app, "GET", "/me/favorites", Some("  "), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn favorites_round_trip() {
    let (app, _tmp) = app().await;
    let (status, fav) = send(
        &app,
        "POST",
        "/me/favorites",
        Some("u1"),
        Some(json!({"dialogId": "42", "mastery": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(fav["id"], "42");

    let (_, list) = send(&app, "GET", "/me/favorites", Some("u1"), None).await;
    assert_eq!(list["favorites"][0]["mastery"], 2);

    let (_, is_fav) = send(&app, "GET", "/me/favorites/42", Some("u1"), None).await;
    assert_eq!(is_fav["favorite"], true);
    let (_, other) = send(&app, "GET", "/me/favorites/42", Some("u2"), None).await;
    assert_eq!(other["favorite"], false);

    let (_, removed) = send(&app, "DELETE", "/me/favorites/42", Some("u1"), None).await;
    assert_eq!(removed["removed"], true);
}

#[tokio::test]
async fn notes_enforce_limit() {
    let (app, _tmp) = app().await;
    let uri = "/me/dialogs/d1/notes";
    for i in 0..10 {
        let (status, _) = send(&app, "POST", uri, Some("u1"), Some(json!({"text": format!("n{}", i)}))).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, body) = send(&app, "POST", uri, Some("u1"), Some(json!({"text": "n10"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "note_limit_reached");

    let (_, list) = send(&app, "GET", uri, Some("u1"), None).await;
    let notes = list["notes"].as_array().unwrap();
    assert_eq!(notes.len(), 10);

    let id = notes[0]["id"].as_str().unwrap().to_string();
    let (status, updated) = send(
        &app,
        "PUT",
        &format!("{}/{}", uri, id),
        Some("u1"),
        Some(json!({"text": "edited"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["text"], "edited");
    assert!(updated["updatedAt"].is_i64());

    let (status, _) = send(&app, "DELETE", &format!("{}/{}", uri, id), Some("u1"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "DELETE", &format!("{}/{}", uri, id), Some("u1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "PUT", &format!("{}/missing", uri), Some("u1"), Some(json!({"text": "x"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn dialog_content_save_and_read() {
    let (app, _tmp) = app().await;
    let uri = "/me/dialogs/d7/content";
    let (status, _) = send(&app, "GET", uri, Some("u1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, saved) = send(
        &app,
        "PUT",
        uri,
        Some("u1"),
        Some(json!({"originalText": "你好", "translationText": "hello", "qid": "Q1", "title": "Hi", "type": "type1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["type"], "type1");

    let (_, read) = send(&app, "GET", uri, Some("u1"), None).await;
    assert_eq!(read["translationText"], "hello");
    assert_eq!(read["qid"], "Q1");
}

#[tokio::test]
async fn progress_maps() {
    let (app, _tmp) = app().await;
    send(&app, "POST", "/me/learned", Some("u1"), Some(json!({"qid": "Q1", "dialogId": "d1"}))).await;
    send(&app, "POST", "/me/learned", Some("u1"), Some(json!({"qid": "Q1", "dialogId": "d2"}))).await;
    let (_, skipped) = send(&app, "POST", "/me/listened", Some("u1"), Some(json!({"qid": "", "dialogId": "d2"}))).await;
    assert_eq!(skipped["recorded"], false);

    let (_, learned) = send(&app, "GET", "/me/learned", Some("u1"), None).await;
    assert_eq!(learned, json!({"Q1": {"d1": true, "d2": true}}));
    let (_, listened) = send(&app, "GET", "/me/listened", Some("u1"), None).await;
    assert_eq!(listened, json!({}));
}

#[tokio::test]
async fn practice_logs() {
    let (app, _tmp) = app().await;
    let (status, log) = send(
        &app,
        "POST",
        "/me/practice-logs",
        Some("u1"),
        Some(json!({"questionId": "Q1", "questionTitle": "Coffee", "questionNumber": "3", "questionType": "type1", "score": 8.5})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(log["score"], 8.5);

    let (_, all) = send(&app, "GET", "/me/practice-logs", Some("u1"), None).await;
    assert_eq!(all["logs"].as_array().unwrap().len(), 1);
    let (_, today) = send(&app, "GET", "/me/practice-logs?today=true", Some("u1"), None).await;
    assert_eq!(today["logs"].as_array().unwrap().len(), 1);
    let (_, future) = send(
        &app,
        "GET",
        &format!("/me/practice-logs?since={}", i64::MAX),
        Some("u1"),
        None,
    )
    .await;
    assert!(future["logs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn settings_merge_and_scope_validation() {
    let (app, _tmp) = app().await;
    let (_, unset) = send(&app, "GET", "/me/settings/player", Some("u1"), None).await;
    assert_eq!(unset["settings"], Value::Null);

    send(&app, "PUT", "/me/settings/player", Some("u1"), Some(json!({"rate": 1.0, "autoplay": true}))).await;
    let (_, merged) = send(&app, "PUT", "/me/settings/player", Some("u1"), Some(json!({"rate": 0.75}))).await;
    assert_eq!(merged["settings"], json!({"rate": 0.75, "autoplay": true}));

    let (status, body) = send(&app, "GET", "/me/settings/theme", Some("u1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn feedback_and_polls_are_public() {
    let (app, _tmp) = app().await;
    let (status, body) = send(&app, "POST", "/feedback", None, Some(json!({"text": "more dialogs please"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["id"].is_string());

    let (_, empty) = send(&app, "GET", "/polls/mp3_features", None, None).await;
    assert_eq!(empty, json!({"need_mp3": 0, "no_mp3": 0}));

    let (_, after) = send(&app, "POST", "/polls/mp3_features/votes", None, Some(json!({"option": "need_mp3"}))).await;
    assert_eq!(after, json!({"need_mp3": 1, "no_mp3": 0}));

    let (status, _) = send(&app, "POST", "/polls/mp3_features/votes", None, Some(json!({"option": "wav"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn inference_routes_need_a_relay() {
    let (app, _tmp) = app().await;
    let (status, body) = send(
        &app,
        "POST",
        "/inference/check-translation",
        None,
        Some(json!({"original": "你好", "translation": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "inference_disabled");
}

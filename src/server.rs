//! HTTP API for the dataset and per-user state.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/dataset` | Dataset status without rows |
//! | `POST` | `/dataset/load` | Load if missing or stale; `{"force": true}` to force |
//! | `POST` | `/dataset/refresh` | Forced reload |
//! | `GET`  | `/dialogs` | qid groups in encounter order |
//! | `GET`  | `/dialogs/{qid}` | Rows of one group |
//! | `*`    | `/me/...` | Favorites, notes, progress, practice logs, settings |
//! | `POST` | `/feedback` | Feedback, anonymous allowed |
//! | `GET`/`POST` | `/polls/{poll_id}[/votes]` | Feature polls |
//! | `POST` | `/inference/...` | Relay-backed scoring and suggestions |
//!
//! `/me` routes identify the caller by the `x-user-id` header set by the
//! authenticating proxy in front of this service; a missing header is 401.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "text must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `note_limit_reached` (409), `inference_disabled` (400),
//! `dataset_unavailable` (503), `inference_failed` (502), `timeout` (504),
//! `internal` (500).

use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{header::USER_AGENT, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::cache::DatasetCache;
use crate::config::Config;
use crate::inference::{InferenceClient, InferenceError};
use crate::models::{Dataset, DatasetStatus, LoadOutcome};
use crate::userdata::{
    Favorite, NewPracticeLog, Note, PollOption, PollResults, PracticeLog, ProgressMap,
    SettingsScope, UserDataError, UserId, UserStore,
};

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    cache: Arc<DatasetCache>,
    store: UserStore,
    inference: Option<Arc<InferenceClient>>,
}

impl AppState {
    pub fn new(
        cache: Arc<DatasetCache>,
        store: UserStore,
        inference: Option<Arc<InferenceClient>>,
    ) -> Self {
        Self {
            cache,
            store,
            inference,
        }
    }
}

/// Starts the HTTP server on `[server].bind`.
///
/// An initial dataset load runs in the background so the listener is up
/// immediately; requests that need rows join that load.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let cache = Arc::new(DatasetCache::from_config(config)?);
    let store = UserStore::open(&config.db).await?;
    let inference = config
        .inference
        .as_ref()
        .map(InferenceClient::from_config)
        .transpose()?
        .map(Arc::new);
    if inference.is_none() {
        info!("no [inference] section; inference routes are disabled");
    }

    let warm = cache.clone();
    tokio::spawn(async move {
        let outcome = warm.load(false).await;
        info!(outcome = outcome.label(), "initial dataset load finished");
    });

    let app = router(AppState::new(cache, store, inference));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "dialog server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the router. Exposed for tests and embedding.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/dataset", get(handle_dataset))
        .route("/dataset/load", post(handle_load))
        .route("/dataset/refresh", post(handle_refresh))
        .route("/dialogs", get(handle_dialogs))
        .route("/dialogs/{qid}", get(handle_dialog))
        .route(
            "/me/favorites",
            get(handle_list_favorites).post(handle_add_favorite),
        )
        .route(
            "/me/favorites/{dialog_id}",
            get(handle_is_favorite).delete(handle_remove_favorite),
        )
        .route(
            "/me/dialogs/{dialog_id}/notes",
            get(handle_list_notes).post(handle_add_note),
        )
        .route(
            "/me/dialogs/{dialog_id}/notes/{note_id}",
            put(handle_update_note).delete(handle_delete_note),
        )
        .route(
            "/me/dialogs/{dialog_id}/content",
            get(handle_get_content).put(handle_save_content),
        )
        .route("/me/learned", get(handle_learned).post(handle_mark_learned))
        .route(
            "/me/listened",
            get(handle_listened).post(handle_mark_listened),
        )
        .route(
            "/me/practice-logs",
            get(handle_practice_logs).post(handle_add_practice_log),
        )
        .route(
            "/me/settings/{scope}",
            get(handle_get_settings).put(handle_save_settings),
        )
        .route("/feedback", post(handle_feedback))
        .route("/polls/{poll_id}", get(handle_poll_results))
        .route("/polls/{poll_id}/votes", post(handle_vote))
        .route(
            "/inference/check-translation",
            post(handle_check_translation),
        )
        .route(
            "/inference/note-suggestions",
            post(handle_note_suggestions),
        )
        .route(
            "/inference/smart-completion",
            post(handle_smart_completion),
        )
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<UserDataError> for AppError {
    fn from(e: UserDataError) -> Self {
        match e {
            UserDataError::NoteLimitReached { .. } => {
                app_error(StatusCode::CONFLICT, "note_limit_reached", e.to_string())
            }
            UserDataError::NotFound(_) => not_found(e.to_string()),
            UserDataError::Invalid(_) => bad_request(e.to_string()),
            UserDataError::Corrupt(_) | UserDataError::Database(_) => {
                error!(error = %e, "user store failure");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
            }
        }
    }
}

impl From<InferenceError> for AppError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::Timeout => app_error(StatusCode::GATEWAY_TIMEOUT, "timeout", e.to_string()),
            _ => app_error(StatusCode::BAD_GATEWAY, "inference_failed", e.to_string()),
        }
    }
}

// ============ Extractors ============

/// The caller's user id, taken from [`USER_HEADER`].
pub struct CurrentUser(pub UserId);

fn user_from_headers(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(UserId::new)
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        user_from_headers(&parts.headers)
            .map(CurrentUser)
            .ok_or_else(|| {
                app_error(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    format!("missing {} header", USER_HEADER),
                )
            })
    }
}

fn parse_json<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| bad_request(format!("invalid JSON body: {}", e)))
}

// ============ Health and dataset ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_dataset(State(state): State<AppState>) -> Json<DatasetStatus> {
    Json(state.cache.snapshot().status())
}

#[derive(Deserialize, Default)]
struct LoadRequest {
    #[serde(default)]
    force: bool,
}

#[derive(Serialize)]
struct LoadResponse {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    groups: Option<usize>,
    dataset: DatasetStatus,
}

impl LoadResponse {
    fn new(outcome: &LoadOutcome, dataset: &Dataset) -> Self {
        let (rows, groups) = match outcome {
            LoadOutcome::Loaded { rows, groups } => (Some(*rows), Some(*groups)),
            _ => (None, None),
        };
        Self {
            outcome: outcome.label(),
            rows,
            groups,
            dataset: dataset.status(),
        }
    }
}

async fn handle_load(State(state): State<AppState>, body: Bytes) -> Result<Json<LoadResponse>, AppError> {
    let req: LoadRequest = parse_json(&body)?;
    let outcome = state.cache.load(req.force).await;
    Ok(Json(LoadResponse::new(&outcome, &state.cache.snapshot())))
}

async fn handle_refresh(State(state): State<AppState>) -> Json<LoadResponse> {
    let outcome = state.cache.refresh().await;
    Json(LoadResponse::new(&outcome, &state.cache.snapshot()))
}

/// Load if needed, then return the snapshot or 503 with the ingest error.
async fn loaded_snapshot(state: &AppState) -> Result<Arc<Dataset>, AppError> {
    state.cache.load(false).await;
    let ds = state.cache.snapshot();
    if ds.loaded {
        return Ok(ds);
    }
    let message = ds
        .error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "dataset is not loaded".to_string());
    Err(app_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "dataset_unavailable",
        message,
    ))
}

async fn handle_dialogs(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let ds = loaded_snapshot(&state).await?;
    Ok(Json(json!({ "groups": ds.groups() })))
}

async fn handle_dialog(
    State(state): State<AppState>,
    Path(qid): Path<String>,
) -> Result<Json<Value>, AppError> {
    let ds = loaded_snapshot(&state).await?;
    let rows = ds.group(&qid);
    if rows.is_empty() {
        return Err(not_found(format!("no dialog with qid {}", qid)));
    }
    Ok(Json(json!({ "qid": qid, "rows": rows })))
}

// ============ Favorites ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FavoriteRequest {
    dialog_id: String,
    #[serde(default)]
    mastery: i64,
}

async fn handle_list_favorites(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Value>, AppError> {
    let favorites: Vec<Favorite> = state.store.list_favorites(&user).await?;
    Ok(Json(json!({ "favorites": favorites })))
}

async fn handle_add_favorite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<FavoriteRequest>,
) -> Result<(StatusCode, Json<Favorite>), AppError> {
    let favorite = state
        .store
        .add_favorite(&user, &req.dialog_id, req.mastery)
        .await?;
    Ok((StatusCode::CREATED, Json(favorite)))
}

async fn handle_is_favorite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(dialog_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let favorite = state.store.is_favorite(&user, &dialog_id).await?;
    Ok(Json(json!({ "favorite": favorite })))
}

async fn handle_remove_favorite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(dialog_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let removed = state.store.remove_favorite(&user, &dialog_id).await?;
    Ok(Json(json!({ "removed": removed })))
}

// ============ Notes and dialog content ============

#[derive(Deserialize)]
struct NoteRequest {
    text: String,
}

async fn handle_list_notes(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(dialog_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let notes: Vec<Note> = state.store.list_notes(&user, &dialog_id).await?;
    Ok(Json(json!({ "notes": notes })))
}

async fn handle_add_note(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(dialog_id): Path<String>,
    Json(req): Json<NoteRequest>,
) -> Result<(StatusCode, Json<Note>), AppError> {
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let note = state.store.add_note(&user, &dialog_id, &req.text).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

async fn handle_update_note(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((dialog_id, note_id)): Path<(String, String)>,
    Json(req): Json<NoteRequest>,
) -> Result<Json<Note>, AppError> {
    let note = state
        .store
        .update_note(&user, &dialog_id, &note_id, &req.text)
        .await?;
    Ok(Json(note))
}

async fn handle_delete_note(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((dialog_id, note_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_note(&user, &dialog_id, &note_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("note {} not found", note_id)))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest {
    #[serde(default)]
    original_text: String,
    #[serde(default)]
    translation_text: String,
    #[serde(default)]
    qid: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "type")]
    kind: String,
}

async fn handle_get_content(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(dialog_id): Path<String>,
) -> Result<Response, AppError> {
    match state.store.dialog_content(&user, &dialog_id).await? {
        Some(content) => Ok(Json(content).into_response()),
        None => Err(not_found(format!("no saved content for dialog {}", dialog_id))),
    }
}

async fn handle_save_content(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(dialog_id): Path<String>,
    Json(req): Json<ContentRequest>,
) -> Result<Response, AppError> {
    let content = state
        .store
        .save_dialog_content(
            &user,
            &dialog_id,
            &req.original_text,
            &req.translation_text,
            req.qid.as_deref(),
            &req.title,
            &req.kind,
        )
        .await?;
    Ok(Json(content).into_response())
}

// ============ Progress ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkRequest {
    qid: String,
    dialog_id: String,
}

async fn handle_learned(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ProgressMap>, AppError> {
    Ok(Json(state.store.all_learned(&user).await?))
}

async fn handle_mark_learned(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<MarkRequest>,
) -> Result<Json<Value>, AppError> {
    let recorded = state
        .store
        .mark_learned(&user, &req.qid, &req.dialog_id)
        .await?;
    Ok(Json(json!({ "recorded": recorded })))
}

async fn handle_listened(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ProgressMap>, AppError> {
    Ok(Json(state.store.all_listening_progress(&user).await?))
}

async fn handle_mark_listened(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<MarkRequest>,
) -> Result<Json<Value>, AppError> {
    let recorded = state
        .store
        .mark_listened(&user, &req.qid, &req.dialog_id)
        .await?;
    Ok(Json(json!({ "recorded": recorded })))
}

// ============ Practice logs ============

#[derive(Deserialize)]
struct PracticeQuery {
    since: Option<i64>,
    #[serde(default)]
    today: bool,
}

async fn handle_practice_logs(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PracticeQuery>,
) -> Result<Json<Value>, AppError> {
    let logs: Vec<PracticeLog> = if query.today {
        state.store.today_practice_logs(&user).await?
    } else if let Some(since) = query.since {
        state.store.practice_logs_since(&user, since).await?
    } else {
        state.store.all_practice_logs(&user).await?
    };
    Ok(Json(json!({ "logs": logs })))
}

async fn handle_add_practice_log(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<NewPracticeLog>,
) -> Result<(StatusCode, Json<PracticeLog>), AppError> {
    let log = state.store.add_practice_log(&user, &req).await?;
    Ok((StatusCode::CREATED, Json(log)))
}

// ============ Settings ============

async fn handle_get_settings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(scope): Path<String>,
) -> Result<Json<Value>, AppError> {
    let scope: SettingsScope = scope.parse()?;
    let settings = state.store.get_settings(&user, scope).await?;
    Ok(Json(json!({ "settings": settings })))
}

async fn handle_save_settings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(scope): Path<String>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let scope: SettingsScope = scope.parse()?;
    let merged = state.store.save_settings(&user, scope, &patch).await?;
    Ok(Json(json!({ "settings": merged })))
}

// ============ Feedback and polls ============

#[derive(Deserialize)]
struct FeedbackRequest {
    text: String,
    #[serde(default)]
    email: Option<String>,
}

async fn handle_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let user = user_from_headers(&headers);
    let user_agent = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
    let id = state
        .store
        .add_feedback(user.as_ref(), req.email.as_deref(), user_agent, &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

#[derive(Deserialize)]
struct VoteRequest {
    option: String,
}

async fn handle_vote(
    State(state): State<AppState>,
    Path(poll_id): Path<String>,
    Json(req): Json<VoteRequest>,
) -> Result<Json<PollResults>, AppError> {
    let option: PollOption = req.option.parse()?;
    Ok(Json(state.store.record_vote(&poll_id, option).await?))
}

async fn handle_poll_results(
    State(state): State<AppState>,
    Path(poll_id): Path<String>,
) -> Result<Json<PollResults>, AppError> {
    Ok(Json(state.store.poll_results(&poll_id).await?))
}

// ============ Inference ============

fn inference_client(state: &AppState) -> Result<&InferenceClient, AppError> {
    state.inference.as_deref().ok_or_else(|| {
        app_error(
            StatusCode::BAD_REQUEST,
            "inference_disabled",
            "no [inference] relay is configured",
        )
    })
}

#[derive(Deserialize)]
struct CheckRequest {
    original: String,
    translation: String,
}

async fn handle_check_translation(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<Value>, AppError> {
    let client = inference_client(&state)?;
    if req.original.trim().is_empty() || req.translation.trim().is_empty() {
        return Err(bad_request("original and translation must not be empty"));
    }
    let result = client
        .check_translation(&req.original, &req.translation)
        .await?;
    Ok(Json(json!({ "result": result })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssistRequest {
    original_text: String,
    translation_text: String,
    #[serde(default)]
    ai_check_result: String,
    /// Current note text or current input, depending on the route.
    #[serde(default, alias = "currentNoteText", alias = "currentInput")]
    current: String,
}

async fn handle_note_suggestions(
    State(state): State<AppState>,
    Json(req): Json<AssistRequest>,
) -> Result<Json<Value>, AppError> {
    let client = inference_client(&state)?;
    let result = client
        .note_suggestions(
            &req.original_text,
            &req.translation_text,
            &req.ai_check_result,
            &req.current,
        )
        .await?;
    Ok(Json(json!({ "result": result })))
}

async fn handle_smart_completion(
    State(state): State<AppState>,
    Json(req): Json<AssistRequest>,
) -> Result<Json<Value>, AppError> {
    let client = inference_client(&state)?;
    let result = client
        .smart_completion(
            &req.original_text,
            &req.translation_text,
            &req.ai_check_result,
            &req.current,
        )
        .await?;
    Ok(Json(json!({ "result": result })))
}

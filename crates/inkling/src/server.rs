//! Inkling HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET` | `/health` | no | Health check (returns version) |
//! | `POST` | `/api/analyze` | no | Simple analysis stream over inline fragments |
//! | `POST` | `/api/relations/analyze` | yes | Relation analysis stream over stored fragments |
//! | `GET` `POST` | `/api/relations` | yes | List / create relations |
//! | `GET` `POST` | `/api/relations/suggestions` | yes | List pending / save suggestions |
//! | `POST` | `/api/relations/suggestions/accept` | yes | Accept a suggestion |
//! | `POST` | `/api/relations/suggestions/reject` | yes | Reject a suggestion |
//! | `POST` | `/api/fragments/batch-update` | yes | Batch move / tag fragments |
//! | `GET` `POST` | `/api/fragments` | yes | List / create fragments |
//! | `POST` | `/api/stories`, `/api/tags` | yes | Create a story / tag |
//! | `GET` | `/api/search` | yes | Search fragments by content and story title |
//! | `GET` | `/api/search/suggestions` | yes | Stories and tags matching a partial query |
//! | `GET` `POST` | `/api/history` | yes | List / create history records |
//! | `GET` `DELETE` | `/api/history/{id}` | yes | Fetch / delete a history record |
//!
//! # Stream contract
//!
//! Analysis endpoints answer with the line protocol of
//! [`inkling_core::stream`]: one `f:{"messageId":...}` line, a `0:` line per
//! non-empty text delta, and a final `3:` line if the completion service
//! fails mid-stream. A failure before the first delta is answered with a
//! `502 upstream_error` JSON body instead of a stream.
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "MISSING_FRAGMENTS", "message": "no fragments provided" } }
//! ```
//!
//! Domain errors carry their upper-snake code. Transport-level codes are
//! `bad_request` (400), `upstream_error` (502) and `internal` (500).

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use inkling_core::batch::{apply_batch, validate_request, BatchError, BatchUpdateRequest};
use inkling_core::error::AnalysisError;
use inkling_core::models::{
    AnalysisMode, AnalysisPrompt, Fragment, NewHistoryRecord, NewRelation, NewSuggestion,
    RelationType, StoredSuggestion,
};
use inkling_core::prompt::{build_prompt, validate_fragments, validate_relation_ids};
use inkling_core::search::{self, suggestion_query, SearchPage, SearchQuery, SearchSuggestions};
use inkling_core::store::Store;
use inkling_core::stream::{encode_error, encode_metadata, encode_text_delta};

use crate::auth::{authenticate, CurrentUser};
use crate::completion::{CompletionProvider, CompletionRequest, OpenAiCompatibleProvider};
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub provider: Arc<dyn CompletionProvider>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            provider,
        }
    }

    fn owner(&self, headers: &HeaderMap) -> Result<String, AppError> {
        Ok(authenticate(headers, &self.config.auth)?)
    }
}

/// Starts the server with the configured OpenAI-compatible provider.
///
/// Opens (and migrates) the SQLite database, binds `[server].bind`, and
/// serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let provider = OpenAiCompatibleProvider::from_config(&config.completion)?;
    run_server_with_provider(config, Arc::new(provider)).await
}

/// Like [`run_server`], with a caller-supplied completion provider.
pub async fn run_server_with_provider(
    config: &Config,
    provider: Arc<dyn CompletionProvider>,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config.clone(), Arc::new(SqliteStore::new(pool)), provider);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(bind = %bind_addr, "inkling server listening");

    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/analyze", post(handle_analyze))
        .route("/api/relations/analyze", post(handle_relation_analyze))
        .route(
            "/api/relations",
            get(handle_list_relations).post(handle_create_relation),
        )
        .route(
            "/api/relations/suggestions",
            get(handle_list_suggestions).post(handle_save_suggestions),
        )
        .route(
            "/api/relations/suggestions/accept",
            post(handle_accept_suggestion),
        )
        .route(
            "/api/relations/suggestions/reject",
            post(handle_reject_suggestion),
        )
        .route("/api/fragments/batch-update", post(handle_batch_update))
        .route(
            "/api/fragments",
            get(handle_list_fragments).post(handle_create_fragment),
        )
        .route("/api/stories", post(handle_create_story))
        .route("/api/tags", post(handle_create_tag))
        .route(
            "/api/history",
            get(handle_list_history).post(handle_create_history),
        )
        .route("/api/search", get(handle_search))
        .route("/api/search/suggestions", get(handle_search_suggestions))
        .route(
            "/api/history/{id}",
            get(handle_get_history).delete(handle_delete_history),
        )
        .layer(TraceLayer::new_for_http())
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

/// Error type that converts into the JSON error contract.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        AppError {
            status: StatusCode::from_u16(err.status()).unwrap_or(StatusCode::BAD_REQUEST),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %format!("{:#}", err), "request failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal".to_string(),
            message: "internal server error".to_string(),
        }
    }
}

impl From<BatchError> for AppError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Rejected(e) => e.into(),
            BatchError::Store(e) => e.into(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn upstream_error(err: anyhow::Error) -> AppError {
    warn!(error = %format!("{:#}", err), "completion service failed before streaming");
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "upstream_error".to_string(),
        message: format!("{:#}", err),
    }
}

/// Malformed JSON bodies are reported as 400, like every other request
/// error.
fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(v)| v)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn required(value: Option<String>, field: &'static str) -> Result<String, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AnalysisError::MissingField(field).into())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Analysis streams ============

#[derive(Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    fragments: Vec<Fragment>,
    #[serde(default, rename = "targetFragment")]
    target_fragment: Option<Fragment>,
}

/// `POST /api/analyze`. Fragments arrive inline, so no lookup or
/// authentication is needed.
async fn handle_analyze(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = parse_body(body)?;
    validate_fragments(&req.fragments)?;

    let prompt = build_prompt(
        AnalysisMode::Simple,
        &req.fragments,
        req.target_fragment.as_ref(),
    );
    stream_analysis(&state, AnalysisMode::Simple, prompt).await
}

fn default_depth() -> String {
    "basic".to_string()
}

#[derive(Deserialize)]
struct RelationAnalyzeRequest {
    #[serde(default)]
    fragment_ids: Vec<String>,
    #[serde(default = "default_depth")]
    analysis_depth: String,
}

/// `POST /api/relations/analyze`. Checks run in order: id count,
/// authentication, owned-fragment lookup.
async fn handle_relation_analyze(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RelationAnalyzeRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = parse_body(body)?;
    validate_relation_ids(&req.fragment_ids)?;
    let owner = state.owner(&headers)?;

    let found = state.store.fragments_by_ids(&owner, &req.fragment_ids).await?;
    if found.is_empty() {
        return Err(AnalysisError::FragmentsNotFound.into());
    }
    let ordered: Vec<Fragment> = req
        .fragment_ids
        .iter()
        .filter_map(|id| found.iter().find(|f| &f.id == id).cloned())
        .collect();

    debug!(
        requested = req.fragment_ids.len(),
        found = ordered.len(),
        depth = %req.analysis_depth,
        "relation analysis"
    );
    let prompt = build_prompt(AnalysisMode::Relation, &ordered, None);
    stream_analysis(&state, AnalysisMode::Relation, prompt).await
}

/// Opens the completion and re-encodes its deltas into the line protocol.
async fn stream_analysis(
    state: &AppState,
    mode: AnalysisMode,
    prompt: AnalysisPrompt,
) -> Result<Response, AppError> {
    let completion = &state.config.completion;
    let request = CompletionRequest::new(
        prompt,
        completion.model.clone(),
        completion.temperature(mode),
    );

    let mut deltas = state
        .provider
        .stream(request)
        .await
        .map_err(upstream_error)?;

    let first = match deltas.next().await {
        Some(Err(e)) => return Err(upstream_error(e)),
        other => other,
    };

    let message_id = uuid::Uuid::new_v4().to_string();
    debug!(message_id = %message_id, mode = mode.as_str(), "streaming analysis");

    let metadata = encode_metadata(&serde_json::json!({ "messageId": message_id }));
    let lines = stream::iter(first)
        .chain(deltas)
        .scan(false, move |failed, item| {
            let next = if *failed {
                None
            } else {
                match item {
                    Ok(delta) if delta.is_empty() => Some(None),
                    Ok(delta) => Some(Some(encode_text_delta(&delta))),
                    Err(e) => {
                        *failed = true;
                        let message = format!("{:#}", e);
                        warn!(message_id = %message_id, error = %message, "completion failed mid-stream");
                        Some(Some(encode_error(&message)))
                    }
                }
            };
            future::ready(next)
        })
        .filter_map(future::ready);

    let body = stream::once(future::ready(metadata))
        .chain(lines)
        .map(|line| Ok::<_, Infallible>(Bytes::from(line)));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

// ============ History ============

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

async fn handle_list_history(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, AppError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let records = state.store.list_history(&owner, limit).await?;
    Ok(Json(records).into_response())
}

async fn handle_create_history(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    body: Result<Json<NewHistoryRecord>, JsonRejection>,
) -> Result<Response, AppError> {
    let record = parse_body(body)?;
    let stored = state.store.insert_history(&owner, &record).await?;
    Ok((StatusCode::CREATED, Json(stored)).into_response())
}

async fn handle_get_history(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    match state.store.get_history(&owner, &id).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Err(AnalysisError::NotFound("history record").into()),
    }
}

async fn handle_delete_history(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_history(&owner, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AnalysisError::NotFound("history record").into())
    }
}

// ============ Search ============

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    story_id: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

/// `GET /api/search`. The query is validated before authentication.
/// Unparseable paging values fall back to their defaults.
async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchPage>, AppError> {
    let query = SearchQuery::new(
        params.q.as_deref(),
        params.story_id,
        params.limit.and_then(|v| v.trim().parse().ok()),
        params.offset.and_then(|v| v.trim().parse().ok()),
    )?;
    let owner = state.owner(&headers)?;

    let page = search::search(state.store.as_ref(), &owner, &query).await?;
    debug!(query = %query.text, found = page.fragments.len(), total = page.total, "search");
    Ok(Json(page))
}

#[derive(Deserialize)]
struct SuggestionParams {
    q: Option<String>,
}

/// `GET /api/search/suggestions`. An empty query answers with empty lists
/// without checking credentials.
async fn handle_search_suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SuggestionParams>,
) -> Result<Json<SearchSuggestions>, AppError> {
    let Some(text) = suggestion_query(params.q.as_deref())? else {
        return Ok(Json(SearchSuggestions::default()));
    };
    let owner = state.owner(&headers)?;
    Ok(Json(search::suggest(state.store.as_ref(), &owner, &text).await?))
}

// ============ Relation suggestions ============

#[derive(Deserialize)]
struct SaveSuggestionsRequest {
    #[serde(default)]
    suggestions: Vec<NewSuggestion>,
}

#[derive(Serialize)]
struct SavedResponse {
    saved: usize,
}

async fn handle_save_suggestions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SaveSuggestionsRequest>, JsonRejection>,
) -> Result<Json<SavedResponse>, AppError> {
    let req = parse_body(body)?;
    if req.suggestions.is_empty() {
        return Err(bad_request("suggestions array required"));
    }
    let owner = state.owner(&headers)?;
    let saved = state.store.save_suggestions(&owner, &req.suggestions).await?;
    Ok(Json(SavedResponse { saved }))
}

#[derive(Deserialize)]
struct SuggestionQuery {
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SuggestionListResponse {
    suggestions: Vec<StoredSuggestion>,
    total_pending: i64,
}

async fn handle_list_suggestions(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    Query(query): Query<SuggestionQuery>,
) -> Result<Json<SuggestionListResponse>, AppError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 50);
    let suggestions = state.store.pending_suggestions(&owner, limit).await?;
    let total_pending = state.store.count_pending_suggestions(&owner).await?;
    Ok(Json(SuggestionListResponse {
        suggestions,
        total_pending,
    }))
}

#[derive(Deserialize)]
struct SuggestionActionRequest {
    #[serde(default)]
    suggestion_id: Option<String>,
}

async fn handle_accept_suggestion(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SuggestionActionRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let id = required(parse_body(body)?.suggestion_id, "suggestion_id")?;
    let owner = state.owner(&headers)?;
    match state.store.accept_suggestion(&owner, &id).await? {
        Some(relation) => Ok(Json(relation).into_response()),
        None => Err(AnalysisError::NotFound("pending suggestion").into()),
    }
}

async fn handle_reject_suggestion(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SuggestionActionRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = required(parse_body(body)?.suggestion_id, "suggestion_id")?;
    let owner = state.owner(&headers)?;
    let changed = state.store.reject_suggestion(&owner, &id).await?;
    debug!(suggestion_id = %id, changed, "reject suggestion");
    Ok(Json(serde_json::json!({ "success": true })))
}

// ============ Relations ============

#[derive(Deserialize)]
struct RelationsQuery {
    fragment_id: Option<String>,
}

async fn handle_list_relations(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    Query(query): Query<RelationsQuery>,
) -> Result<Response, AppError> {
    let relations = state
        .store
        .list_relations(&owner, query.fragment_id.as_deref())
        .await?;
    Ok(Json(relations).into_response())
}

#[derive(Deserialize)]
struct CreateRelationRequest {
    #[serde(default)]
    source_fragment_id: Option<String>,
    #[serde(default)]
    target_fragment_id: Option<String>,
    #[serde(default)]
    relation_type: Option<String>,
    #[serde(default)]
    strength: Option<f64>,
    #[serde(default)]
    description: Option<String>,
}

async fn handle_create_relation(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateRelationRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = parse_body(body)?;
    let source = required(req.source_fragment_id, "source_fragment_id")?;
    let target = required(req.target_fragment_id, "target_fragment_id")?;
    let kind = required(req.relation_type, "relation_type")?;
    if source == target {
        return Err(AnalysisError::SelfRelation.into());
    }
    let relation_type = kind.parse::<RelationType>().unwrap_or_default();
    if relation_type == RelationType::Unknown {
        return Err(bad_request(format!("unknown relation_type: {}", kind)));
    }
    if let Some(strength) = req.strength {
        if !(0.0..=1.0).contains(&strength) {
            return Err(bad_request("strength must be in [0, 1]"));
        }
    }

    let owner = state.owner(&headers)?;
    let owned = state
        .store
        .fragments_by_ids(&owner, &[source.clone(), target.clone()])
        .await?;
    if owned.len() != 2 {
        return Err(AnalysisError::NotFound("fragment").into());
    }

    let relation = NewRelation {
        source_fragment_id: source,
        target_fragment_id: target,
        relation_type,
        strength: req.strength,
        description: req.description,
    };
    match state.store.create_relation(&owner, &relation).await? {
        Some(created) => Ok((StatusCode::CREATED, Json(created)).into_response()),
        None => Err(AnalysisError::RelationExists.into()),
    }
}

// ============ Batch update ============

async fn handle_batch_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<BatchUpdateRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = parse_body(body)?;
    let action = validate_request(&req)?;
    let owner = state.owner(&headers)?;

    let outcome = apply_batch(state.store.as_ref(), &owner, action, &req).await?;
    for err in &outcome.errors {
        warn!(action = %action, error = %err, "batch mutation failed");
    }
    Ok(Json(outcome).into_response())
}

// ============ Fragments, stories, tags ============

async fn handle_list_fragments(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
) -> Result<Response, AppError> {
    let fragments = state.store.list_fragments(&owner).await?;
    Ok(Json(fragments).into_response())
}

#[derive(Deserialize)]
struct CreateFragmentRequest {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    story_id: Option<String>,
}

async fn handle_create_fragment(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    body: Result<Json<CreateFragmentRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = parse_body(body)?;
    let content = required(req.content, "content")?;
    let story_id = req.story_id.filter(|s| !s.is_empty());
    if let Some(story_id) = story_id.as_deref() {
        if !state.store.story_exists(&owner, story_id).await? {
            return Err(AnalysisError::StoryNotFound.into());
        }
    }
    let fragment = state
        .store
        .create_fragment(&owner, &content, story_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(fragment)).into_response())
}

#[derive(Deserialize)]
struct CreateStoryRequest {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

async fn handle_create_story(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    body: Result<Json<CreateStoryRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = parse_body(body)?;
    let title = required(req.title, "title")?;
    let story = state
        .store
        .create_story(
            &owner,
            &title,
            req.description.as_deref(),
            req.color.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(story)).into_response())
}

#[derive(Deserialize)]
struct CreateTagRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

async fn handle_create_tag(
    State(state): State<AppState>,
    CurrentUser(owner): CurrentUser,
    body: Result<Json<CreateTagRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let req = parse_body(body)?;
    let name = required(req.name, "name")?;
    let tag = state
        .store
        .create_tag(&owner, &name, req.color.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(tag)).into_response())
}

//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/generate` | Stream a report for a prompt |
//! | `GET`  | `/api/rules` | Rules files as a directory tree |
//! | `POST` | `/api/rules` | Upload a rules file (multipart `file`, `path?`) |
//! | `GET`  | `/api/rules/{path}` | Raw file content |
//! | `DELETE` | `/api/rules/{path}` | Delete a rules file |
//! | `GET`  | `/api/autocomplete?q=` | Up to 10 matching paths |
//! | `GET`  | `/api/sheets` | The caller's latest sheets (bearer) |
//! | `POST` | `/api/sheets/save` | Save a sheet (bearer) |
//! | `GET`  | `/api/sheets/{id}` | One sheet as JSON |
//! | `GET`  | `/api/context` | The caller's context entries (bearer) |
//! | `POST` | `/api/context/upload` | Store a context entry (bearer) |
//! | `GET`  | `/api/github/auth` | Start a GitHub login |
//! | `GET`  | `/api/github/callback` | GitHub OAuth redirect target |
//! | `GET`  | `/api/github/user` | The signed-in user (bearer) |
//! | `GET`  | `/api/github/repos` | The signed-in user's repositories (bearer) |
//! | `GET`  | `/api/commands` | Static command catalog |
//! | `GET`  | `/sheets/{id}` | A sheet rendered as an HTML page |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Every error response is JSON:
//!
//! ```json
//! { "error": "Sheet not found" }
//! ```
//!
//! `400` validation, `401` missing or unknown bearer token, `404` not
//! found, `502` completion API unreachable or rejecting, `500` storage.
//!
//! # Streaming
//!
//! `/api/generate` answers `text/event-stream` whose body is the plain
//! concatenation of model deltas, flushed as each one arrives. Failures
//! before the upstream accepts the request are JSON errors; failures after
//! are appended inline as `\n\nError: …`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted, and `OPTIONS` on any
//! path answers an empty `200`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        multipart::Multipart,
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Path, Query, Request, State,
    },
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use sheets_core::commands::COMMANDS;
use sheets_core::models::NewSheet;
use sheets_core::store::KvStore;
use sheets_core::SheetsError;

use crate::analyze::{
    build_analysis_prompt, parse_repo, AnalysisType, AnalyzeRequest, RepoAnalyzer,
    ANALYSIS_SYSTEM_PROMPT,
};
use crate::auth::{current_session, require_session, GithubOAuth};
use crate::config::Config;
use crate::context::{list_user_context, upload_user_context};
use crate::fetch::Fetcher;
use crate::generate::{GenerateRequest, Pipeline};
use crate::kv::SqliteKv;
use crate::relay::{build_http_client, CompletionClient, DeltaStream};
use crate::render::{render_sheet_page, SheetPage};
use crate::{db, migrate, rules, sheets};

/// Uploads above this size are rejected before reaching a handler.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    kv: Arc<dyn KvStore>,
    pool: SqlitePool,
    fetcher: Fetcher,
    completions: CompletionClient,
    github: GithubOAuth,
    analyzer: RepoAnalyzer,
}

impl AppState {
    /// Open the database, apply the schema, and build the shared clients.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let store = SqliteKv::new(pool.clone());
        let purged = store.purge_expired().await?;
        if purged > 0 {
            info!(purged, "removed expired kv entries");
        }

        let http = build_http_client()?;

        Ok(Self {
            config: Arc::new(config.clone()),
            kv: Arc::new(store),
            pool,
            fetcher: Fetcher::new(http.clone(), config.fetch.clone()),
            completions: CompletionClient::new(http.clone(), config.upstream.clone()),
            analyzer: RepoAnalyzer::new(http.clone(), config.github.clone()),
            github: GithubOAuth::new(http, config.github.clone(), config.server.app_url.clone()),
        })
    }
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::connect(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "sheets server listening");
    println!("Sheets server listening on http://{}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/generate", post(handle_generate))
        .route("/api/analyze-repo", post(handle_analyze_repo))
        .route("/api/rules", get(handle_rules_tree).post(handle_rules_upload))
        .route(
            "/api/rules/{*path}",
            get(handle_rules_get).delete(handle_rules_delete),
        )
        .route("/api/autocomplete", get(handle_autocomplete))
        .route("/api/sheets", get(handle_sheets_list))
        .route("/api/sheets/save", post(handle_sheets_save))
        .route("/api/sheets/{id}", get(handle_sheets_get))
        .route("/api/context", get(handle_context_list))
        .route("/api/context/upload", post(handle_context_upload))
        .route("/api/github/auth", get(handle_github_auth))
        .route("/api/github/callback", get(handle_github_callback))
        .route("/api/github/user", get(handle_github_user))
        .route("/api/github/repos", get(handle_github_repos))
        .route("/api/commands", get(handle_commands))
        .route("/sheets/{id}", get(handle_sheet_page))
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(answer_options))
        .layer(cors)
        .with_state(state)
}

/// Any `OPTIONS` request gets an empty `200`; CORS headers are added by
/// the outer layer.
async fn answer_options(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

// ============ Error response ============

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, message)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SheetsError> for AppError {
    fn from(err: SheetsError) -> Self {
        let status = match &err {
            SheetsError::Validation(_) | SheetsError::NoUrl => StatusCode::BAD_REQUEST,
            SheetsError::NotFound(_) => StatusCode::NOT_FOUND,
            SheetsError::Unauthorized => StatusCode::UNAUTHORIZED,
            SheetsError::UpstreamConnect(_)
            | SheetsError::UpstreamStream(_)
            | SheetsError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            SheetsError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if err.is_client_error() {
            debug!(error = %err, %status, "request rejected");
        } else {
            error!(error = %err, %status, "request failed");
        }
        AppError::new(status, err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
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

async fn handle_not_found() -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "Not Found")
}

// ============ POST /api/generate ============

/// Validates, assembles the prompt, opens the upstream stream, then
/// forwards deltas as they are decoded. Nothing is streamed until the
/// upstream has accepted the request.
async fn handle_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body?;
    let session = current_session(state.kv.as_ref(), &headers).await?;
    let user_id = session.as_ref().map(|s| s.user_id());

    let pipeline = Pipeline {
        store: state.kv.as_ref(),
        fetcher: &state.fetcher,
        require_url: state.config.generate.require_url,
    };
    let prepared = pipeline.prepare(&request, user_id.as_deref()).await?;
    let deltas = state.completions.open(&prepared.text).await?;
    Ok(stream_response(deltas))
}

fn stream_response(deltas: DeltaStream) -> Response {
    let body = Body::from_stream(deltas.map(|delta| Ok::<_, Infallible>(Bytes::from(delta))));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

// ============ POST /api/analyze-repo ============

/// Snapshot a GitHub repository and stream an analysis of it. A signed-in
/// caller's GitHub token is used for the API calls.
async fn handle_analyze_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = body?;
    let repo = parse_repo(&request.repo, &state.config.fetch.github_host)?;
    let kind = request
        .analysis_type
        .as_deref()
        .map(AnalysisType::parse)
        .unwrap_or_default();

    let session = current_session(state.kv.as_ref(), &headers).await?;
    let token = session.as_ref().map(|s| s.github_token.as_str());

    let snapshot = state.analyzer.snapshot(&repo, token).await?;
    let prompt = build_analysis_prompt(&snapshot, kind);
    info!(
        repo = %format!("{}/{}", repo.owner, repo.name),
        kind = kind.as_str(),
        signed_in = session.is_some(),
        "analyzing repository"
    );

    let deltas = state
        .completions
        .open_with_system(ANALYSIS_SYSTEM_PROMPT, &prompt)
        .await?;
    Ok(stream_response(deltas))
}

// ============ /api/rules ============

async fn handle_rules_tree(State(state): State<AppState>) -> Result<Response, AppError> {
    let tree = rules::rules_tree(state.kv.as_ref()).await?;
    Ok(Json(tree).into_response())
}

/// Multipart upload: `file` carries the content; `path` overrides the
/// stored path, which otherwise defaults to the uploaded file name.
async fn handle_rules_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut content: Option<String> = None;
    let mut file_name: Option<String> = None;
    let mut path: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                content = Some(field.text().await.map_err(|e| bad_request(e.body_text()))?);
            }
            Some("path") => {
                path = Some(field.text().await.map_err(|e| bad_request(e.body_text()))?);
            }
            _ => {}
        }
    }

    let content = content.ok_or_else(|| bad_request("No file provided"))?;
    let path = path
        .filter(|p| !p.trim().is_empty())
        .or(file_name)
        .ok_or_else(|| bad_request("path is required"))?;
    let path = path.trim().to_string();

    rules::write_file(state.kv.as_ref(), &path, &content).await?;
    Ok(Json(json!({ "success": true, "path": path })))
}

async fn handle_rules_get(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let content = rules::read_file(state.kv.as_ref(), &path).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], content).into_response())
}

async fn handle_rules_delete(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Value>, AppError> {
    rules::delete_file(state.kv.as_ref(), &path).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
struct AutocompleteQuery {
    #[serde(default)]
    q: String,
}

async fn handle_autocomplete(
    State(state): State<AppState>,
    query: Result<Query<AutocompleteQuery>, QueryRejection>,
) -> Result<Json<Vec<String>>, AppError> {
    let Query(query) = query?;
    Ok(Json(rules::autocomplete(state.kv.as_ref(), &query.q).await?))
}

// ============ /api/sheets ============

async fn handle_sheets_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let session = require_session(state.kv.as_ref(), &headers).await?;
    let sheets = sheets::list_sheets(&state.pool, &session.user_id()).await?;
    Ok(Json(json!({ "sheets": sheets })))
}

async fn handle_sheets_save(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NewSheet>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let session = require_session(state.kv.as_ref(), &headers).await?;
    let Json(sheet) = body?;
    let id = sheets::save_sheet(&state.pool, &session.user_id(), &sheet).await?;
    info!(id = %id, user = %session.login, "sheet saved");
    Ok(Json(json!({ "id": id, "success": true })))
}

async fn handle_sheets_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let sheet = sheets::get_sheet(&state.pool, &id).await?;
    Ok(Json(json!({ "sheet": sheet })))
}

async fn handle_sheet_page(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match sheets::get_sheet(&state.pool, &id).await {
        Ok(sheet) => Html(render_sheet_page(&SheetPage::from_sheet(&sheet))).into_response(),
        Err(SheetsError::NotFound(message)) => (
            StatusCode::NOT_FOUND,
            Html(format!("<!DOCTYPE html>\n<h1>{}</h1>\n", message)),
        )
            .into_response(),
        Err(e) => AppError::from(e).into_response(),
    }
}

// ============ /api/context ============

async fn handle_context_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let session = require_session(state.kv.as_ref(), &headers).await?;
    let files = list_user_context(state.kv.as_ref(), &session.user_id()).await?;
    Ok(Json(json!({ "files": files })))
}

#[derive(Deserialize)]
struct ContextUpload {
    #[serde(default)]
    path: String,
    content: String,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

async fn handle_context_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ContextUpload>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let session = require_session(state.kv.as_ref(), &headers).await?;
    let Json(upload) = body?;
    upload_user_context(
        state.kv.as_ref(),
        &session.user_id(),
        &upload.path,
        &upload.content,
        upload.metadata,
    )
    .await?;
    Ok(Json(json!({ "success": true, "path": upload.path.trim() })))
}

// ============ /api/github ============

async fn handle_github_auth(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let auth_url = state.github.begin(state.kv.as_ref()).await?;
    Ok(Json(json!({ "authUrl": auth_url })))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

async fn handle_github_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, AppError> {
    let target = state
        .github
        .complete(
            state.kv.as_ref(),
            query.code.as_deref(),
            query.state.as_deref(),
        )
        .await?;
    Ok(Redirect::to(&target))
}

async fn handle_github_user(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let session = require_session(state.kv.as_ref(), &headers).await?;
    Ok(Json(json!({ "user": session.public() })))
}

async fn handle_github_repos(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let session = require_session(state.kv.as_ref(), &headers).await?;
    let repos = state.github.repos(&session).await?;
    Ok(Json(json!({ "repos": repos })))
}

// ============ GET /api/commands ============

async fn handle_commands() -> Json<Value> {
    Json(json!({ "commands": COMMANDS }))
}

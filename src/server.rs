//! HTTP front end (axum).
//!
//! | Method | Path           | Body / query                                   | Response               |
//! |--------|----------------|------------------------------------------------|------------------------|
//! | GET    | `/health`      |                                                | `ok`                   |
//! | GET    | `/auth/status` |                                                | `{authorized, ...}`    |
//! | GET    | `/auth/url`    |                                                | `{url}`                |
//! | POST   | `/auth/code`   | `{"code": "..."}`                              | `{authorized: true}`   |
//! | POST   | `/distribute`  | raw PDF; `channels`, `source_password`, `name`, `<channel>_password`, `<channel>_owner_password` | `DistributionReport` |
//!
//! When an access key is configured (`SYS_PASSWORD`), every route except
//! `/health` requires it in the `x-access-key` header.
//!
//! Each distribution runs in its own spawned task, so a client that
//! disconnects mid-request does not cancel a half-finished upload.

use crate::channel::{parse_channel_list, Channel, ChannelPlan};
use crate::config::DistributorConfig;
use crate::distribute::distribute;
use crate::drive::{BaiduDrive, CloudDrive};
use crate::error::DistributorError;
use crate::output::{ArtifactStage, DistributionReport};
use crate::pipeline::input::SourceDocument;
use crate::progress::DistributionProgressCallback;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Largest accepted PDF upload.
pub const MAX_UPLOAD_BYTES: usize = 200 * 1024 * 1024;
/// Header carrying the access key.
pub const ACCESS_KEY_HEADER: &str = "x-access-key";

/// Shared state of the web server.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

struct AppInner {
    config: DistributorConfig,
    drive: Arc<BaiduDrive>,
    access_key: Option<String>,
}

impl AppState {
    /// `access_key` of `None` (or empty) leaves the API open.
    pub fn new(mut config: DistributorConfig, drive: Arc<BaiduDrive>, access_key: Option<String>) -> Self {
        if config.progress_callback.is_none() {
            config.progress_callback = Some(Arc::new(LogProgress));
        }
        Self {
            inner: Arc::new(AppInner {
                config,
                drive,
                access_key: access_key.filter(|k| !k.is_empty()),
            }),
        }
    }

    pub fn drive(&self) -> &Arc<BaiduDrive> {
        &self.inner.drive
    }

    /// Whether protected routes demand the `x-access-key` header.
    pub fn requires_access_key(&self) -> bool {
        self.inner.access_key.is_some()
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/auth/status", get(auth_status))
        .route("/auth/url", get(auth_url))
        .route("/auth/code", post(auth_code))
        .route("/distribute", post(distribute_upload))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_access_key));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Bind `host:port` and serve until Ctrl-C, then persist the drive session.
pub async fn serve(host: &str, port: u16, state: AppState) -> Result<(), DistributorError> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DistributorError::InvalidConfig(format!("cannot bind {addr}: {e}")))?;
    info!("Listening on http://{}", addr);
    if !state.requires_access_key() {
        warn!(
            "No access key configured (SYS_PASSWORD); /distribute and /auth/code are open to anyone who can reach {}",
            addr
        );
    }

    let session = Arc::clone(state.drive().session());
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| DistributorError::Internal(format!("server error: {e}")))?;

    info!("Shutting down; persisting drive session");
    session.persist().await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn require_access_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.inner.access_key {
        let given = request
            .headers()
            .get(ACCESS_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if given != Some(expected.as_str()) {
            warn!("Rejected {} {}: missing or wrong access key", request.method(), request.uri().path());
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "access key required", "kind": "access_denied" })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct AuthStatus {
    authorized: bool,
    token_file: String,
    expires_at: Option<i64>,
}

async fn auth_status(State(state): State<AppState>) -> Result<Json<AuthStatus>, ApiError> {
    let drive = state.drive();
    let authorized = drive.check_auth().await?;
    let token = drive.session().token().await;
    Ok(Json(AuthStatus {
        authorized,
        token_file: drive.session().store().path().display().to_string(),
        expires_at: token.and_then(|t| t.expires_at()),
    }))
}

async fn auth_url(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let url = state.drive().authorize_url()?;
    Ok(Json(json!({ "url": url })))
}

#[derive(Debug, Deserialize)]
struct CodeRequest {
    code: String,
}

async fn auth_code(
    State(state): State<AppState>,
    Json(body): Json<CodeRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.drive().activate(&body.code).await?;
    Ok(Json(json!({ "authorized": true })))
}

async fn distribute_upload(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let name = query
        .get("name")
        .cloned()
        .or_else(|| header_file_name(&headers))
        .unwrap_or_else(|| "upload.pdf".to_string());
    let source = SourceDocument::from_bytes(name, body.to_vec())?;
    let plans = plans_from_query(&query)?;

    let mut config = state.inner.config.clone();
    if let Some(pwd) = query.get("source_password").filter(|p| !p.is_empty()) {
        config.source_password = Some(pwd.clone());
    }
    debug!(
        "Distribution request for '{}' ({} bytes) to {:?}",
        source.name(),
        source.len(),
        plans.iter().map(|p| p.channel).collect::<Vec<_>>()
    );

    // Detached: the run finishes even if the client goes away.
    let job_state = state.clone();
    let job = tokio::spawn(async move {
        let drive: &dyn CloudDrive = job_state.inner.drive.as_ref();
        distribute(&source, &plans, &config, drive).await
    });
    let report = job
        .await
        .map_err(|e| DistributorError::Internal(format!("distribution task failed: {e}")))??;

    Ok((report_status(&report), Json(report)).into_response())
}

/// 200 when every channel succeeded, 207 when some did, 502 when none did.
fn report_status(report: &DistributionReport) -> StatusCode {
    if report.all_succeeded() {
        StatusCode::OK
    } else if report.stats.succeeded > 0 {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::BAD_GATEWAY
    }
}

/// Channel plans from `channels` (default: all) and per-channel password overrides.
fn plans_from_query(query: &HashMap<String, String>) -> Result<Vec<ChannelPlan>, DistributorError> {
    let channels = match query.get("channels") {
        Some(list) => parse_channel_list(list)?,
        None => Channel::ALL.to_vec(),
    };
    Ok(channels
        .into_iter()
        .map(|channel| {
            let mut plan = ChannelPlan::new(channel);
            if let Some(pwd) = query.get(&format!("{}_password", channel.id())) {
                plan = plan.with_user_password(pwd.clone());
            }
            if let Some(pwd) = query.get(&format!("{}_owner_password", channel.id())) {
                plan = plan.with_owner_password(pwd.clone());
            }
            plan
        })
        .collect())
}

fn header_file_name(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-file-name")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// A library error rendered as a JSON response.
struct ApiError(DistributorError);

impl From<DistributorError> for ApiError {
    fn from(e: DistributorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            DistributorError::SourceRead { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "source_read"),
            DistributorError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            DistributorError::Auth { .. } => (StatusCode::UNAUTHORIZED, "auth"),
            DistributorError::Upload { .. } => (StatusCode::BAD_GATEWAY, "upload"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            error!("{}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string(), "kind": kind }))).into_response()
    }
}

/// Progress events forwarded to the log.
struct LogProgress;

impl DistributionProgressCallback for LogProgress {
    fn on_channel_start(&self, channel: Channel, position: usize, total_channels: usize) {
        info!("[{}/{}] {}: starting", position, total_channels, channel);
    }

    fn on_stage(&self, channel: Channel, stage: ArtifactStage) {
        debug!("{}: {}", channel, stage);
    }

    fn on_channel_complete(&self, channel: Channel, destination: &str) {
        info!("{}: done → {}", channel, destination);
    }

    fn on_channel_error(&self, channel: Channel, error: &str) {
        warn!("{}: {}", channel, error);
    }
}

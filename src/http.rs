// HTTP surface: JSON API, access-log middleware, and the SPA shell.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::db::{self, Database};
use crate::error::HubError;
use crate::hub::HubHandle;
use crate::resource::{NewResource, ResourceRegistry, ResourceSort};
use crate::speech::{NewSpeech, Speech};
use crate::stats::SiteStats;
use crate::timer::{TimerReplace, TimerState};

/// Default page size for `GET /api/speeches`.
const DEFAULT_SPEECH_LIMIT: u32 = 10;

/// Speeches included in the `GET /api/stats` payload.
const STATS_SPEECH_LIMIT: u32 = 5;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppContext {
    pub hub: HubHandle,
    pub db: Arc<Database>,
    pub resources: Arc<ResourceRegistry>,
    pub static_dir: PathBuf,
}

/// Build the router for the full HTTP surface.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/speeches", get(get_speeches).post(post_speech))
        .route("/api/resources", get(get_resources).post(post_resource))
        .route("/api/resources/{id}/download", get(download_resource))
        .route("/api/timer", get(get_timer).post(post_timer))
        .route("/api/timer/reset", axum::routing::post(post_timer_reset))
        .route("/api/time", get(get_time))
        .fallback(get(spa_shell))
        .layer(middleware::from_fn_with_state(ctx.clone(), record_visit))
        .with_state(ctx)
}

/// Serve the router until a shutdown signal arrives.
pub async fn serve(ctx: AppContext, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
    info!("HTTP server listening on http://{addr}");

    axum::serve(
        listener,
        router(ctx).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::Validation(_) => StatusCode::BAD_REQUEST,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
            HubError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HubError::ExternalService(_) => StatusCode::BAD_GATEWAY,
        };
        // 5xx details stay in the log; clients get a generic message.
        let body = if status.is_server_error() {
            error!("Request failed: {self}");
            json!({ "error": "internal server error" })
        } else {
            json!({ "error": self.to_string() })
        };
        (status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Access-log middleware
// ---------------------------------------------------------------------------

/// Record every inbound request as a visit: one access-log row plus both
/// counter increments. Failures are logged and never block the request.
async fn record_visit(State(ctx): State<AppContext>, request: Request, next: Next) -> Response {
    let page = request.uri().path().to_string();
    // Present when the server was started with connect-info; absent in
    // direct handler tests.
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(&request, peer);
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if let Err(e) = ctx.db.record_visit(&page, &ip, &user_agent, db::now()) {
        warn!("Failed to record visit for {page}: {e:#}");
    }

    next.run(request).await
}

/// Prefer the first `X-Forwarded-For` hop, then the socket address.
fn client_ip(request: &Request, peer: Option<SocketAddr>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| {
            peer.map(|addr| addr.ip().to_string())
                .unwrap_or_else(|| "unknown".to_string())
        })
}

// ---------------------------------------------------------------------------
// Stats and speeches
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(rename = "siteStats")]
    site_stats: SiteStats,
    #[serde(rename = "latestSpeeches")]
    latest_speeches: Vec<Speech>,
}

async fn get_stats(State(ctx): State<AppContext>) -> Result<Json<StatsResponse>, HubError> {
    let site_stats = ctx.db.site_stats()?;
    let latest_speeches = ctx.db.latest_speeches(STATS_SPEECH_LIMIT)?;
    Ok(Json(StatsResponse {
        site_stats,
        latest_speeches,
    }))
}

#[derive(Debug, Deserialize)]
struct SpeechListQuery {
    limit: Option<String>,
}

async fn get_speeches(
    State(ctx): State<AppContext>,
    Query(query): Query<SpeechListQuery>,
) -> Result<Json<Vec<Speech>>, HubError> {
    let limit = coerce_limit(query.limit.as_deref());
    Ok(Json(ctx.db.latest_speeches(limit)?))
}

async fn post_speech(
    State(ctx): State<AppContext>,
    Json(submission): Json<NewSpeech>,
) -> Result<Json<serde_json::Value>, HubError> {
    let speech = ctx.hub.add_speech(submission).await?;
    Ok(Json(json!({ "success": true, "speechId": speech.id })))
}

/// Coerce a `limit` query value to a positive integer; absent or invalid
/// values fall back to the default.
fn coerce_limit(raw: Option<&str>) -> u32 {
    raw.and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_SPEECH_LIMIT)
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ResourceListQuery {
    category: Option<String>,
    sort: Option<String>,
}

async fn get_resources(
    State(ctx): State<AppContext>,
    Query(query): Query<ResourceListQuery>,
) -> Result<Json<Vec<crate::resource::Resource>>, HubError> {
    let sort = ResourceSort::parse(query.sort.as_deref());
    let resources = ctx.resources.list(query.category.as_deref(), sort)?;
    Ok(Json(resources))
}

async fn post_resource(
    State(ctx): State<AppContext>,
    Json(submission): Json<NewResource>,
) -> Result<Json<serde_json::Value>, HubError> {
    let resource = ctx.resources.register(submission, db::now())?;
    let download_url = resource.download_url();
    Ok(Json(json!({
        "success": true,
        "resource": resource,
        "downloadUrl": download_url,
    })))
}

async fn download_resource(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Redirect, HubError> {
    let url = ctx.resources.resolve_download(&id)?;
    Ok(Redirect::temporary(&url))
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

async fn get_timer(State(ctx): State<AppContext>) -> Result<Json<TimerState>, HubError> {
    Ok(Json(ctx.hub.get_timer().await?))
}

async fn post_timer(
    State(ctx): State<AppContext>,
    Json(update): Json<TimerReplace>,
) -> Result<Json<serde_json::Value>, HubError> {
    let timer = ctx.hub.replace_timer(update).await?;
    Ok(Json(json!({ "success": true, "timer": timer })))
}

#[derive(Debug, Default, Deserialize)]
struct ResetRequest {
    total_time: Option<u32>,
}

async fn post_timer_reset(
    State(ctx): State<AppContext>,
    body: axum::body::Bytes,
) -> Result<Json<serde_json::Value>, HubError> {
    // An empty body means "reset with the current total".
    let request: ResetRequest = if body.is_empty() {
        ResetRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| HubError::validation(format!("invalid reset request: {e}")))?
    };
    let timer = ctx.hub.reset_timer(request.total_time).await?;
    Ok(Json(json!({ "success": true, "timer": timer })))
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

async fn get_time() -> Json<serde_json::Value> {
    let now = db::now();
    Json(json!({
        "serverTime": now.to_rfc3339(),
        "timestamp": now.timestamp_millis(),
    }))
}

/// Catch-all: serve the single-page application shell.
async fn spa_shell(State(ctx): State<AppContext>) -> Response {
    let index = ctx.static_dir.join("index.html");
    match tokio::fs::read_to_string(&index).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            warn!("Failed to read SPA shell at {}: {e}", index.display());
            (StatusCode::NOT_FOUND, "application shell not found").into_response()
        }
    }
}

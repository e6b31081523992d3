//! HTTP binding of the control surface.
//!
//! Thin layer: handlers deserialize the wire shapes, bridge onto the
//! blocking core via `spawn_blocking`, and map error kinds to status codes.
//! All semantics live in the pipelines behind [`App`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app::{ApiError, App};
use crate::indexer::{IndexOutcome, IndexRequest, IndexStatus};
use crate::search::SearchHit;
use crate::store::Page;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        let body = json!({ "error": kind, "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct IndexResponse {
    id: u64,
    status: IndexStatus,
    message: String,
}

impl From<IndexOutcome> for IndexResponse {
    fn from(outcome: IndexOutcome) -> Self {
        let message = match outcome.status {
            IndexStatus::Indexed => "Page indexed; enrichment in progress.",
            IndexStatus::AlreadyIndexed => "Page already indexed recently; visit recorded.",
            IndexStatus::Reindexed => "Stale page re-indexed; enrichment in progress.",
        };
        Self {
            id: outcome.id,
            status: outcome.status,
            message: message.to_string(),
        }
    }
}

/// Page as exposed over the wire: no embedding, no raw content dump.
#[derive(Serialize)]
struct PageJson {
    id: u64,
    url: String,
    title: String,
    description: String,
    keywords: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    favicon_url: Option<String>,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    visit_count: u64,
    arc_score: f32,
}

impl From<Page> for PageJson {
    fn from(page: Page) -> Self {
        Self {
            id: page.id,
            url: page.url,
            title: page.title,
            description: page.description,
            keywords: page.keywords,
            favicon_url: page.favicon_url,
            created_at: page.indexed_at,
            last_updated_at: page.last_updated_at,
            visit_count: page.visit_count,
            arc_score: page.arc_score,
        }
    }
}

#[derive(Serialize)]
struct SearchResultJson {
    id: u64,
    url: String,
    title: String,
    description: String,
    keywords: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    favicon_url: Option<String>,
    created_at: DateTime<Utc>,
    relevance_score: f32,
    metadata: SearchMetadata,
}

#[derive(Serialize)]
struct SearchMetadata {
    vector_score: f32,
    keyword_score: f32,
    access_count: u64,
    final_score: f32,
}

impl From<SearchHit> for SearchResultJson {
    fn from(hit: SearchHit) -> Self {
        Self {
            id: hit.page.id,
            url: hit.page.url,
            title: hit.page.title,
            description: hit.page.description,
            keywords: hit.page.keywords,
            favicon_url: hit.page.favicon_url,
            created_at: hit.page.indexed_at,
            relevance_score: hit.final_score,
            metadata: SearchMetadata {
                vector_score: hit.semantic_score,
                keyword_score: hit.keyword_score,
                access_count: hit.page.visit_count,
                final_score: hit.final_score,
            },
        }
    }
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResultJson>,
    query: String,
    total_found: usize,
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

#[derive(Deserialize)]
struct UrlParams {
    url: String,
}

#[derive(Deserialize)]
struct TrackVisitBody {
    url: String,
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_list_limit")]
    limit: usize,
}

fn default_list_limit() -> usize {
    20
}

#[derive(Deserialize)]
struct LimitParam {
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Deserialize)]
struct CountParam {
    #[serde(default = "default_limit")]
    count: usize,
}

fn default_limit() -> usize {
    10
}

type SharedApp = Arc<App>;

pub fn router(app: SharedApp) -> Router {
    Router::new()
        .route("/index", post(index_page))
        .route("/probe", get(probe))
        .route("/search", get(search))
        .route("/track-visit", post(track_visit))
        .route("/pages", get(list_pages))
        .route("/pages/{id}", get(get_page).delete(delete_page))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/top", get(cache_top))
        .route("/cache/clear", post(cache_clear))
        .route("/cache/cleanup", post(cache_cleanup))
        .route("/eviction/preview", get(eviction_preview))
        .route("/eviction/run", post(eviction_run))
        .route("/eviction/stats", get(eviction_stats))
        .with_state(app)
}

/// Bridge a blocking core call onto the runtime.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

async fn index_page(
    State(app): State<SharedApp>,
    Json(request): Json<IndexRequest>,
) -> Result<Json<IndexResponse>, ApiError> {
    let outcome = blocking(move || app.ingest(request)).await?;
    Ok(Json(outcome.into()))
}

async fn probe(
    State(app): State<SharedApp>,
    Query(params): Query<UrlParams>,
) -> Result<Json<crate::indexer::ProbeOutcome>, ApiError> {
    let outcome = blocking(move || app.probe(&params.url)).await?;
    Ok(Json(outcome))
}

async fn search(
    State(app): State<SharedApp>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = params.q.clone();
    let hits = blocking(move || Ok(app.search(&params.q))).await?;
    let results: Vec<SearchResultJson> = hits.into_iter().map(Into::into).collect();
    Ok(Json(SearchResponse {
        total_found: results.len(),
        results,
        query,
    }))
}

async fn track_visit(
    State(app): State<SharedApp>,
    Json(body): Json<TrackVisitBody>,
) -> Result<Json<crate::frequency::VisitOutcome>, ApiError> {
    let outcome = blocking(move || app.track_visit(&body.url)).await?;
    Ok(Json(outcome))
}

async fn list_pages(
    State(app): State<SharedApp>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (offset, limit) = (params.offset, params.limit);
    let (pages, total) = blocking(move || app.list_pages(offset, limit)).await?;
    let pages: Vec<PageJson> = pages.into_iter().map(Into::into).collect();
    Ok(Json(json!({
        "pages": pages,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

async fn get_page(
    State(app): State<SharedApp>,
    Path(id): Path<u64>,
) -> Result<Json<PageJson>, ApiError> {
    let page = blocking(move || app.get_page(id)).await?;
    Ok(Json(page.into()))
}

async fn delete_page(
    State(app): State<SharedApp>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    blocking(move || app.delete_page(id)).await?;
    Ok(Json(json!({ "message": format!("page {id} deleted") })))
}

async fn stats(
    State(app): State<SharedApp>,
) -> Result<Json<crate::app::ServiceStats>, ApiError> {
    let stats = blocking(move || app.stats()).await?;
    Ok(Json(stats))
}

async fn health(
    State(app): State<SharedApp>,
) -> Result<Json<crate::app::HealthReport>, ApiError> {
    let report = blocking(move || app.health()).await?;
    Ok(Json(report))
}

async fn cache_stats(
    State(app): State<SharedApp>,
) -> Result<Json<crate::semantic::CacheStats>, ApiError> {
    let stats = blocking(move || Ok(app.cache_stats())).await?;
    Ok(Json(stats))
}

async fn cache_top(
    State(app): State<SharedApp>,
    Query(params): Query<LimitParam>,
) -> Result<Json<Vec<crate::semantic::TopQuery>>, ApiError> {
    let top = blocking(move || Ok(app.cache_top(params.limit))).await?;
    Ok(Json(top))
}

async fn cache_clear(State(app): State<SharedApp>) -> Result<Json<serde_json::Value>, ApiError> {
    blocking(move || {
        app.cache_clear();
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "message": "query cache cleared" })))
}

async fn cache_cleanup(
    State(app): State<SharedApp>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let removed = blocking(move || Ok(app.cache_cleanup())).await?;
    Ok(Json(json!({ "removed_count": removed })))
}

async fn eviction_preview(
    State(app): State<SharedApp>,
    Query(params): Query<CountParam>,
) -> Result<Json<Vec<crate::frequency::EvictionCandidate>>, ApiError> {
    let candidates = blocking(move || app.eviction_preview(params.count)).await?;
    Ok(Json(candidates))
}

async fn eviction_run(
    State(app): State<SharedApp>,
) -> Result<Json<crate::frequency::EvictionOutcome>, ApiError> {
    let outcome = blocking(move || app.eviction_run()).await?;
    Ok(Json(outcome))
}

async fn eviction_stats(
    State(app): State<SharedApp>,
) -> Result<Json<crate::frequency::EvictionStats>, ApiError> {
    let stats = blocking(move || app.eviction_stats()).await?;
    Ok(Json(stats))
}

async fn serve(app: SharedApp, addr: SocketAddr) -> anyhow::Result<()> {
    let router = router(app.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Flush the query cache and drain background work before exit.
    tokio::task::spawn_blocking(move || app.shutdown()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("failed to install shutdown handler: {err}");
    }
    log::info!("shutdown signal received");
}

/// Run the daemon: start background workers, then serve until interrupted.
pub fn start_daemon(app: Arc<App>, addr: SocketAddr) -> anyhow::Result<()> {
    app.run_queue();
    app.run_maintenance();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(app, addr))
}

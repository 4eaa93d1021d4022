use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use kinsync_core::{Snapshot, SyncEnvelope};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::search::{SearchAnswer, SearchClient};
use crate::store::{CanonicalStore, MergeMetrics};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: Arc<CanonicalStore>,
    search: Arc<SearchClient>,
}

impl AppState {
    pub async fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let store = CanonicalStore::open(&config.data_file).await?;
        let search = SearchClient::from_config(&config)?;
        Ok(Self {
            store: Arc::new(store),
            search: Arc::new(search),
            config,
        })
    }
}

pub fn app_router(state: AppState) -> Router {
    let body_limit = state.config.body_limit_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/store", get(get_store))
        .route("/api/sync", post(sync))
        .route("/api/search", get(search))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    online_users: usize,
    merge: MergeMetrics,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = Utc::now();
    let online_users = state
        .store
        .presence()
        .await
        .online_users(now.timestamp_millis(), state.config.presence_ttl)
        .len();
    Json(HealthResponse {
        status: "ok",
        timestamp: now.timestamp(),
        online_users,
        merge: state.store.metrics().await,
    })
}

async fn get_store(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.store.snapshot().await)
}

async fn sync(
    State(state): State<AppState>,
    Json(envelope): Json<SyncEnvelope>,
) -> Result<Json<SyncEnvelope>, AppError> {
    let (merged, report) = state.store.sync(&envelope).await?;
    if report.is_noop() {
        tracing::debug!(stale = report.stale, skipped = report.skipped, "Sync changed nothing");
    } else {
        tracing::info!(
            inserted = report.inserted,
            replaced = report.replaced,
            stale = report.stale,
            skipped = report.skipped,
            "Merged client snapshot"
        );
    }
    Ok(Json(merged))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchAnswer>, AppError> {
    let query = query
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::bad_request("Query parameter required"))?;
    Ok(Json(state.search.lookup(&query).await))
}

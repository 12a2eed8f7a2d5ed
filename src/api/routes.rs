use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::config::{StoreBackend, DATASET_LIST_DEFAULT_LIMIT, SILVER_PREFIX};
use crate::error::AppError;
use crate::storage::ObjectStore;
use crate::types::{InvocationEvent, InvocationResponse};
use crate::writer::DatasetWriter;

#[derive(Clone)]
pub struct ApiState {
    pub writer: Arc<DatasetWriter>,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
    pub backend: StoreBackend,
    pub scheduler_enabled: bool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/invoke", post(post_invoke))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/datasets", get(get_datasets))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct DatasetsQuery {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub bucket: String,
    pub backend: String,
    pub scheduler_enabled: bool,
    pub scheduler_running: bool,
    pub last_run_at: Option<String>,
    pub runs_ok: u64,
    pub runs_failed: u64,
    pub runs_skipped: u64,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

#[derive(Serialize)]
pub struct DatasetResponse {
    pub key: String,
    pub s3_path: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// An empty body is a default (full) invocation.
async fn post_invoke(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<InvocationResponse>, AppError> {
    let raw: serde_json::Value = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body)?
    };
    let event = InvocationEvent::from_value(&raw)?;
    info!(mode = %event.mode, interval = ?event.interval, "Invocation received");

    let outcome = state.writer.run(&event).await?;
    Ok(Json(InvocationResponse::ok(&outcome)))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let health = &state.health;
    Json(HealthResponse {
        status: "ok",
        bucket: state.writer.store().bucket().to_string(),
        backend: state.backend.to_string(),
        scheduler_enabled: state.scheduler_enabled,
        scheduler_running: health.scheduler_running(),
        last_run_at: health.last_run_at().map(|t| t.to_rfc3339()),
        runs_ok: health.runs_ok(),
        runs_failed: health.runs_failed(),
        runs_skipped: health.runs_skipped(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50, p95, p99) = state.latency.percentiles();
    let to_ms = |us: Option<u64>| us.map(|v| v as f64 / 1_000.0);
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms: to_ms(p50),
        p95_ms: to_ms(p95),
        p99_ms: to_ms(p99),
    })
}

async fn get_datasets(
    State(state): State<ApiState>,
    Query(params): Query<DatasetsQuery>,
) -> Result<Json<Vec<DatasetResponse>>, AppError> {
    let prefix = params.prefix.unwrap_or_else(|| format!("{SILVER_PREFIX}/"));
    let limit = params.limit.unwrap_or(DATASET_LIST_DEFAULT_LIMIT);
    let store = state.writer.store();

    let listed = store
        .list(&prefix)
        .await?
        .into_iter()
        .take(limit)
        .map(|m| DatasetResponse {
            s3_path: store.uri(&m.key),
            key: m.key,
            size_bytes: m.size_bytes,
            content_type: m.content_type,
            created_at: m.created_at,
        })
        .collect();

    Ok(Json(listed))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

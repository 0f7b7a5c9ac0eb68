//! Pricebook Price Processing Service
//!
//! Thin admin surface over the ingestion pipeline: trigger processing of an upload, poll its
//! progress, cancel it, decide a pending review and read its AI cost.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use pricebook_database::{initialize_databases, PostgresPriceStore, RedisProgressStore};
use pricebook_price_processing::{
    HttpBlobFetcher, PdftoppmRasterizer, PipelineServices, PricePipeline, VlmClient,
};
use pricebook_utils::{init_logging, validate_uuid, AppConfig, ErrorResponse, PricebookError};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<PricePipeline>,
    permits: Arc<Semaphore>,
}

struct ApiError(PricebookError);

impl From<PricebookError> for ApiError {
    fn from(error: PricebookError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse::from(self.0))).into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration ({}), using defaults", e);
        AppConfig::default()
    });

    init_logging(&config.logging)?;
    info!("Starting Pricebook Price Processing Service");

    let db_config = pricebook_database::DatabaseConfig {
        postgres_url: config.database.postgres_url.clone(),
        redis_url: config.database.redis_url.clone(),
        max_connections: config.database.max_connections,
        connection_timeout: Duration::from_secs(config.database.connection_timeout_seconds),
    };
    let (postgres_pool, redis_pool) = initialize_databases(&db_config).await?;
    info!("Database connections established");

    let services = PipelineServices {
        store: Arc::new(PostgresPriceStore::new(postgres_pool)),
        progress_store: Arc::new(RedisProgressStore::new(redis_pool, config.progress.redis_prefix.clone())),
        ai: Arc::new(VlmClient::new(&config.ai)?),
        rasterizer: Arc::new(PdftoppmRasterizer::new(config.extraction.vision_dpi)),
        fetcher: Arc::new(HttpBlobFetcher::new(Duration::from_secs(config.server.timeout_seconds))?),
    };
    let pipeline = Arc::new(PricePipeline::new(&config, services));

    spawn_progress_sweep(pipeline.clone(), Duration::from_secs(config.progress.retention_seconds.max(1)));

    let state = AppState {
        pipeline,
        permits: Arc::new(Semaphore::new(config.pipeline.max_concurrent_uploads.max(1))),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/uploads/:id/process", post(process_upload))
        .route("/api/v1/uploads/:id/progress", get(get_progress))
        .route("/api/v1/uploads/:id/cancel", post(cancel_upload))
        .route("/api/v1/uploads/:id/approve", post(approve_upload))
        .route("/api/v1/uploads/:id/reject", post(reject_upload))
        .route("/api/v1/uploads/:id/cost", get(get_cost))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(&addr).await?;
    info!("Price Processing Service listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_progress_sweep(pipeline: Arc<PricePipeline>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let evicted = pipeline.progress().evict_expired().await;
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted finished progress records");
            }
        }
    });
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "price-processing",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Queue an upload for processing. The run waits for one of the concurrency permits.
async fn process_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let upload_id = validate_uuid(&id)?;

    tokio::spawn(async move {
        let _permit = match state.permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        match state.pipeline.process_file(upload_id).await {
            Ok(report) => info!(upload_id = %upload_id, status = %report.status, "Upload processed"),
            Err(e) => tracing::error!(upload_id = %upload_id, error = %e, "Upload processing failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "upload_id": upload_id, "status": "queued" })),
    ))
}

async fn get_progress(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let upload_id = validate_uuid(&id)?;
    let progress = state
        .pipeline
        .get_progress(upload_id)
        .await
        .ok_or_else(|| PricebookError::not_found(format!("progress for upload {}", upload_id)))?;
    Ok(Json(progress).into_response())
}

async fn cancel_upload(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let upload_id = validate_uuid(&id)?;
    if !state.pipeline.cancel(upload_id).await {
        return Err(PricebookError::not_found(format!("running upload {}", upload_id)).into());
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "upload_id": upload_id, "cancelling": true }))).into_response())
}

async fn approve_upload(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let upload_id = validate_uuid(&id)?;
    let report = state.pipeline.approve_upload(upload_id).await?;
    Ok(Json(report).into_response())
}

async fn reject_upload(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let upload_id = validate_uuid(&id)?;
    let report = state.pipeline.reject_upload(upload_id).await?;
    Ok(Json(report).into_response())
}

async fn get_cost(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let upload_id = validate_uuid(&id)?;
    let summary = state.pipeline.cost_summary(upload_id).await?;
    Ok(Json(summary).into_response())
}

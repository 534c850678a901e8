use crate::auth::{bearer_token, IdentityResolver};
use crate::config::{ApiConfig, UploadConfig};
use crate::error::PipelineError;
use crate::landing::MediaKind;
use crate::pipeline::UploadPipeline;
use crate::signer::SignedVideo;
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Room for multipart boundaries and part headers on top of the media cap.
const MULTIPART_OVERHEAD_BYTES: u64 = 16 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Uuid, PipelineError> {
        let token = bearer_token(headers)?;
        Ok(self.identity.resolve(token).await?)
    }
}

/// Request body limit for the router. Larger than either media cap so the
/// landing stage, not the transport, reports oversized uploads.
pub fn body_limit(config: &UploadConfig) -> usize {
    let largest = config.max_video_bytes.max(config.max_thumbnail_bytes);
    usize::try_from(largest.saturating_add(MULTIPART_OVERHEAD_BYTES)).unwrap_or(usize::MAX)
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig, body_limit: usize) -> Router {
    let cors = if config.cors_enabled {
        let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        if config.cors_origins.is_empty() {
            cors.allow_origin(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            cors.allow_origin(origins)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/videos/:video_id", get(get_video))
        .route("/api/videos/:video_id/upload", post(upload_video))
        .route("/api/videos/:video_id/thumbnail", post(upload_thumbnail))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "upload-service"
    }))
}

async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.check_ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "error": e.label()
            })),
        ),
    }
}

fn parse_video_id(raw: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(raw).map_err(|_| PipelineError::InvalidId(raw.to_string()))
}

async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SignedVideo>, PipelineError> {
    let video_id = parse_video_id(&video_id)?;
    let user_id = state.authenticate(&headers).await?;

    let video = state.pipeline.signed_video(user_id, video_id).await?;
    Ok(Json(video))
}

async fn upload_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SignedVideo>, PipelineError> {
    let video_id = parse_video_id(&video_id)?;
    let user_id = state.authenticate(&headers).await?;
    let mut multipart = multipart.map_err(|e| PipelineError::MalformedBody(e.body_text()))?;

    let wanted = MediaKind::Video.form_field();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::MalformedBody(e.body_text()))?
    {
        if field.name() != Some(wanted) {
            continue;
        }

        let content_type = field.content_type().map(str::to_owned);
        let video = state
            .pipeline
            .upload_video(user_id, video_id, content_type.as_deref(), field)
            .await?;
        return Ok(Json(video));
    }

    Err(PipelineError::MissingField(wanted))
}

async fn upload_thumbnail(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SignedVideo>, PipelineError> {
    let video_id = parse_video_id(&video_id)?;
    let user_id = state.authenticate(&headers).await?;
    let mut multipart = multipart.map_err(|e| PipelineError::MalformedBody(e.body_text()))?;

    let wanted = MediaKind::Thumbnail.form_field();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::MalformedBody(e.body_text()))?
    {
        if field.name() != Some(wanted) {
            continue;
        }

        let content_type = field.content_type().map(str::to_owned);
        let video = state
            .pipeline
            .upload_thumbnail(user_id, video_id, content_type.as_deref(), field)
            .await?;
        return Ok(Json(video));
    }

    Err(PipelineError::MissingField(wanted))
}

/// Start the API server; returns once `shutdown` resolves and in-flight
/// requests have drained.
pub async fn start_api_server<F>(
    state: AppState,
    config: &ApiConfig,
    body_limit: usize,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config, body_limit);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, body_limit, "Starting upload API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

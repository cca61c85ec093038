use crate::config::ApiConfig;
use crate::error::VideoError;
use crate::models::{ProgramVideo, SwapOrdRequest, UploadFile, VideoUploadRequest};
use crate::service::VideoService;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub videos: Arc<VideoService>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for VideoError {
    fn into_response(self) -> Response {
        let status = match &self {
            VideoError::NotFound(_) => StatusCode::NOT_FOUND,
            VideoError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            VideoError::Conflict(_) => StatusCode::CONFLICT,
            VideoError::StorageFailure(_) => StatusCode::BAD_GATEWAY,
            VideoError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            VideoError::Repository(e) => {
                error!(error = %e, "Repository failure");
                "Internal repository error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig, max_upload_bytes: usize) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/programs/:program_id/videos", get(list_videos))
        .route("/api/v1/programs/:program_id/videos/swap", put(swap_video_ord))
        .route(
            "/api/v1/programs/:program_id/videos/:ord",
            post(create_video).delete(delete_video),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "rehab-videos"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.videos.ready().await {
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
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Create a program video from a multipart upload.
///
/// Expects two `files` parts (guide video first, json second) and an
/// `actName` text part. Extra `files` parts and unknown fields are ignored.
#[instrument(skip(state, multipart))]
async fn create_video(
    State(state): State<AppState>,
    Path((program_id, ord)): Path<(i64, i64)>,
    multipart: Multipart,
) -> Result<&'static str, VideoError> {
    let request = read_upload_request(multipart).await?;

    state.videos.create_video(program_id, ord, request).await?;

    Ok("Success create Video")
}

/// Delete the video at an ord
#[instrument(skip(state))]
async fn delete_video(
    State(state): State<AppState>,
    Path((program_id, ord)): Path<(i64, i64)>,
) -> Result<&'static str, VideoError> {
    state.videos.delete_video(program_id, ord).await?;

    Ok("Success delete Video")
}

/// Swap the ords of two videos
#[instrument(skip(state))]
async fn swap_video_ord(
    State(state): State<AppState>,
    Path(program_id): Path<i64>,
    Json(request): Json<SwapOrdRequest>,
) -> Result<&'static str, VideoError> {
    state.videos.swap_video_ord(program_id, request).await?;

    Ok("Success modify Video Ord")
}

/// List the videos of a program
#[instrument(skip(state))]
async fn list_videos(
    State(state): State<AppState>,
    Path(program_id): Path<i64>,
) -> Result<Json<Vec<ProgramVideo>>, VideoError> {
    let videos = state.videos.list_videos(program_id).await?;
    Ok(Json(videos))
}

async fn read_upload_request(mut multipart: Multipart) -> Result<VideoUploadRequest, VideoError> {
    let mut files = Vec::with_capacity(2);
    let mut act_name = String::new();

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("files") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(bad_multipart)?;
                files.push(UploadFile {
                    file_name,
                    content_type,
                    data,
                });
            }
            Some("actName") => {
                act_name = field.text().await.map_err(bad_multipart)?;
            }
            other => {
                warn!(field = ?other, "Ignoring unexpected multipart field");
            }
        }
    }

    // Shape is validated by the service once the program is known
    let mut files = files.into_iter();
    Ok(VideoUploadRequest {
        video: files.next(),
        json: files.next(),
        act_name,
    })
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> VideoError {
    VideoError::InvalidInput(e.body_text())
}

/// Start the videos API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    max_upload_bytes: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config, max_upload_bytes);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting videos API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

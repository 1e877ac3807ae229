//! Handlers for the `/videos` resource.
//!
//! Uploads are streamed to the upload directory, run through the
//! annotation pipeline and published as processed artifacts, which are
//! then served back by name until their TTL lapses.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use vidsight_core::metrics::ProcessingMetrics;
use vidsight_core::naming::{processed_name, unique_filename, validate_video_extension};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Multipart field carrying the uploaded video.
const VIDEO_FIELD: &str = "video";

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub status: &'static str,
    pub processed_video: String,
    pub metrics: ProcessingMetrics,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Guess a Content-Type from a file extension.
fn content_type_for_extension(path: &str) -> &'static str {
    let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::BadRequest(err.body_text())
    }
}

/// Removes a partially written upload unless kept, including when the
/// request is dropped mid-stream.
struct PartialUpload<'a> {
    path: &'a FsPath,
    keep: bool,
}

impl Drop for PartialUpload<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match std::fs::remove_file(self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove partial upload")
            }
        }
    }
}

/// Stream `field` into `path` chunk by chunk, enforcing `max_bytes`.
///
/// The partially written file is removed on any failure.
async fn save_upload(mut field: Field<'_>, path: &FsPath, max_bytes: u64) -> AppResult<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to create upload file: {e}")))?;
    let mut partial = PartialUpload { path, keep: false };

    let mut written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "File too large. Maximum size is {}MB",
                max_bytes / (1024 * 1024)
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AppError::InternalError(format!("Failed to write upload: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| AppError::InternalError(format!("Failed to write upload: {e}")))?;

    partial.keep = true;
    Ok(written)
}

async fn process_upload(state: &AppState, field: Field<'_>) -> AppResult<Json<DetectResponse>> {
    let filename = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("Uploaded video has no filename".into()))?;

    // Nothing touches the filesystem before this check.
    validate_video_extension(&filename, &state.config.storage.allowed_extensions)?;

    let upload_name = unique_filename(&filename);
    let output_name = processed_name(&upload_name);
    let input_path = state.config.storage.upload_dir.join(&upload_name);

    let size_bytes =
        save_upload(field, &input_path, state.config.storage.max_upload_bytes).await?;
    tracing::info!(
        original = %filename,
        upload = %upload_name,
        size_bytes,
        "Video uploaded"
    );

    let (artifact, metrics) = state
        .pipeline
        .process(&input_path, &output_name, Arc::clone(&state.detector))
        .await?;

    Ok(Json(DetectResponse {
        status: "success",
        processed_video: artifact.name,
        metrics,
    }))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/videos/detect
///
/// Accepts a multipart form with a required `video` field, annotates every
/// frame with the detector's results and returns the processed artifact
/// name together with timing metrics.
pub async fn detect_objects(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<DetectResponse>> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() == Some(VIDEO_FIELD) {
            return process_upload(&state, field).await;
        }
    }
    Err(AppError::BadRequest(format!(
        "Missing required '{VIDEO_FIELD}' field"
    )))
}

/// GET /api/v1/videos/processed/{name}
///
/// Streams a processed video and renews its TTL.
pub async fn get_processed_video(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Response> {
    let (_artifact, file) = state.store.touch_and_open(&name).await?;
    let file_size = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for_extension(&name))
        .header(header::CONTENT_LENGTH, file_size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}\""),
        )
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::InternalError(e.to_string()))
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::error_response;
use super::jobs::JobAccepted;
use crate::error::JobError;
use crate::schedule::scheduler::cleanup::remove_files;
use crate::schedule::types::{JobRequest, JobStatus, TimeRange};
use crate::utils::http::{upload_file_name, ApiResponse};
use crate::AppContext;

pub const UPLOAD_FIELD: &str = "audioFile";

pub const ALLOWED_AUDIO_TYPES: [&str; 7] = [
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/ogg",
    "audio/m4a",
    "audio/x-m4a",
    "audio/aac",
];

pub fn upload_router(ctx: Arc<AppContext>) -> Router {
    let limit = ctx.config.max_upload_bytes;
    Router::new()
        .route("/upload", post(upload_audio))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(ctx)
}

pub fn is_allowed_audio(content_type: Option<&str>) -> bool {
    content_type
        .map(|mime| mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase())
        .is_some_and(|mime| ALLOWED_AUDIO_TYPES.contains(&mime.as_str()))
}

/// Accepts an audio file plus optional `startTime` / `endTime` form fields
/// and starts a job on it.
pub async fn upload_audio(State(ctx): State<Arc<AppContext>>, mut multipart: Multipart) -> Response {
    let mut saved: Option<PathBuf> = None;
    let mut start_time = None;
    let mut end_time = None;

    let outcome = async {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| JobError::invalid_input(format!("Malformed upload: {}", e)))?
        {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some(UPLOAD_FIELD) => {
                    if saved.is_some() {
                        return Err(JobError::invalid_input("Only one audio file may be uploaded"));
                    }
                    if !is_allowed_audio(field.content_type()) {
                        return Err(JobError::invalid_input(format!(
                            "Invalid file type: {}. Only audio files are allowed.",
                            field.content_type().unwrap_or("unknown")
                        )));
                    }
                    let path = ctx.config.audio_upload_dir().join(upload_file_name(field.file_name()));
                    saved = Some(path.clone());
                    save_field(field, &path).await?;
                }
                Some("startTime") => start_time = Some(parse_seconds("startTime", field).await?),
                Some("endTime") => end_time = Some(parse_seconds("endTime", field).await?),
                _ => {}
            }
        }
        Ok::<_, JobError>(())
    }
    .await;

    let submitted = match (outcome, saved.clone()) {
        (Err(e), _) => Err(e),
        (Ok(()), None) => Err(JobError::invalid_input("No audio file uploaded")),
        (Ok(()), Some(path)) => match TimeRange::from_bounds(start_time.flatten(), end_time.flatten()) {
            Ok(range) => ctx.supervisor.submit(JobRequest::upload(path).with_time_range(range)).await,
            Err(e) => Err(e),
        },
    };

    match submitted {
        Ok(job_id) => {
            info!("Accepted uploaded audio as job {}", job_id);
            let body = JobAccepted {
                job_id,
                status: JobStatus::Initiated,
            };
            (StatusCode::CREATED, Json(ApiResponse::success(body))).into_response()
        }
        Err(e) => {
            if let Some(path) = saved {
                warn!("Discarding upload {}", path.display());
                remove_files(&[path]).await;
            }
            error_response(e)
        }
    }
}

async fn save_field(mut field: Field<'_>, path: &Path) -> Result<(), JobError> {
    let io_error = |e: std::io::Error| JobError::Internal(format!("failed to write {}: {}", path.display(), e));
    let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| JobError::invalid_input(format!("Upload interrupted: {}", e)))?
    {
        file.write_all(&chunk).await.map_err(io_error)?;
    }
    file.flush().await.map_err(io_error)?;
    Ok(())
}

/// An empty form field counts as absent.
async fn parse_seconds(name: &str, field: Field<'_>) -> Result<Option<f64>, JobError> {
    let text = field
        .text()
        .await
        .map_err(|e| JobError::invalid_input(format!("Malformed {}: {}", name, e)))?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<f64>()
        .map(Some)
        .map_err(|_| JobError::invalid_input(format!("{} must be a number of seconds", name)))
}

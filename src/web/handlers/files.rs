use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio_util::io::ReaderStream;

use super::error_response;
use crate::error::JobError;
use crate::schedule::types::ArtifactKind;
use crate::utils::http::ApiResponse;
use crate::web::PreviewQuery;
use crate::AppContext;

pub fn files_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/files/:job_id/:file_type", get(download_file))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
pub struct Preview {
    pub preview: String,
}

pub async fn download_file(
    State(ctx): State<Arc<AppContext>>,
    Path((job_id, file_type)): Path<(String, String)>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let kind = match ArtifactKind::try_from(file_type.as_str()) {
        Ok(kind) => kind,
        Err(e) => return error_response(e),
    };

    if query.is_preview() {
        return match ctx.supervisor.preview(&job_id, kind).await {
            Ok(preview) => Json(ApiResponse::success(Preview { preview })).into_response(),
            Err(e) => error_response(e),
        };
    }

    let path = match ctx.supervisor.artifact_path(&job_id, kind).await {
        Ok(path) => path,
        Err(e) => return error_response(e),
    };
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            return error_response(JobError::Internal(format!("failed to open {}: {}", path.display(), e)))
        }
    };

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}.{}", job_id, kind.extension()));
    let headers = [
        (header::CONTENT_TYPE, kind.content_type().to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", file_name)),
    ];

    (headers, Body::from_stream(ReaderStream::new(file))).into_response()
}

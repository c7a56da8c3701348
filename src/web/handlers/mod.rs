use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use tracing::{error, warn};

use crate::error::JobError;
use crate::utils::http::ApiResponse;
use crate::AppContext;

pub mod files;
pub mod jobs;
pub mod upload;

pub fn router(ctx: Arc<AppContext>) -> Router {
    let api = Router::new()
        .merge(jobs::jobs_router(ctx.clone()))
        .merge(files::files_router(ctx.clone()))
        .merge(upload::upload_router(ctx));

    Router::new().nest("/api", api)
}

pub fn status_code(e: &JobError) -> StatusCode {
    match e {
        JobError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::InvalidState { .. } | JobError::NotReady { .. } => StatusCode::CONFLICT,
        JobError::StageFailure { .. } | JobError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Maps a core error onto the JSON envelope with its HTTP status.
pub fn error_response(e: JobError) -> Response {
    let code = status_code(&e);
    if code.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    (code, Json(ApiResponse::<()>::error(e.to_string()))).into_response()
}

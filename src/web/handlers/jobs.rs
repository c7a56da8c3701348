use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error_response;
use crate::schedule::types::{ArtifactKind, JobRequest, JobStatus, TimeRange, TimedSegment};
use crate::utils::http::ApiResponse;
use crate::web::ListQuery;
use crate::AppContext;

pub fn jobs_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/transcribe", post(transcribe))
        .route("/status/:job_id", get(job_status))
        .route("/cancel/:job_id", post(cancel_job))
        .route("/jobs/:job_id/results", get(job_results))
        .route("/jobs", get(list_jobs))
        .route("/validate-url", post(validate_url))
        .route("/health", get(health))
        .with_state(ctx)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    pub url: String,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResults {
    pub job_id: String,
    pub transcript: Vec<TimedSegment>,
    pub translation: Vec<TimedSegment>,
    pub file_urls: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateUrlRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateUrlResponse {
    pub valid: bool,
    pub title: String,
}

pub async fn transcribe(State(ctx): State<Arc<AppContext>>, Json(req): Json<TranscribeRequest>) -> Response {
    let time_range = match TimeRange::from_bounds(req.start_time, req.end_time) {
        Ok(range) => range,
        Err(e) => return error_response(e),
    };

    let request = JobRequest::url(req.url).with_time_range(time_range);
    match ctx.supervisor.submit(request).await {
        Ok(job_id) => {
            info!("Accepted transcription job {}", job_id);
            let body = JobAccepted {
                job_id,
                status: JobStatus::Initiated,
            };
            (StatusCode::CREATED, Json(ApiResponse::success(body))).into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn job_status(State(ctx): State<Arc<AppContext>>, Path(job_id): Path<String>) -> Response {
    match ctx.supervisor.status(&job_id).await {
        Ok(job) => Json(ApiResponse::success(job)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn cancel_job(State(ctx): State<Arc<AppContext>>, Path(job_id): Path<String>) -> Response {
    match ctx.supervisor.cancel(&job_id).await {
        Ok(job) => Json(ApiResponse::success(JobAccepted {
            job_id: job.id,
            status: job.status,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn job_results(State(ctx): State<Arc<AppContext>>, Path(job_id): Path<String>) -> Response {
    let artifacts = match ctx.supervisor.results(&job_id).await {
        Ok(artifacts) => artifacts,
        Err(e) => return error_response(e),
    };

    let file_urls = ArtifactKind::all()
        .into_iter()
        .filter(|kind| artifacts.files.get(*kind).is_some())
        .map(|kind| (kind.dir_name().to_string(), file_url(&job_id, kind)))
        .collect();

    Json(ApiResponse::success(JobResults {
        job_id,
        transcript: artifacts.transcript,
        translation: artifacts.translation,
        file_urls,
    }))
    .into_response()
}

pub async fn list_jobs(State(ctx): State<Arc<AppContext>>, Query(query): Query<ListQuery>) -> Response {
    let jobs = ctx.supervisor.recent(query.limit()).await;
    Json(ApiResponse::success(jobs)).into_response()
}

pub async fn validate_url(State(ctx): State<Arc<AppContext>>, Json(req): Json<ValidateUrlRequest>) -> Response {
    match ctx.supervisor.validate_url(&req.url).await {
        Ok(title) => Json(ApiResponse::success(ValidateUrlResponse { valid: true, title })).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn health() -> impl IntoResponse {
    Json(ApiResponse::success(serde_json::json!({ "status": "ok" })))
}

pub fn file_url(job_id: &str, kind: ArtifactKind) -> String {
    format!("/api/files/{}/{}", job_id, kind.dir_name())
}

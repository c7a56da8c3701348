use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schedule::types::{JobStatus, Stage};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {job_id} is {status}")]
    InvalidState { job_id: String, status: JobStatus },

    #[error("results for job {job_id} are not ready (status: {status})")]
    NotReady { job_id: String, status: JobStatus },

    #[error("{stage} stage failed: {message}")]
    StageFailure { stage: Stage, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    InvalidState,
    NotReady,
    StageFailure,
    Internal,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::InvalidInput(_) => ErrorKind::InvalidInput,
            JobError::NotFound(_) => ErrorKind::NotFound,
            JobError::InvalidState { .. } => ErrorKind::InvalidState,
            JobError::NotReady { .. } => ErrorKind::NotReady,
            JobError::StageFailure { .. } => ErrorKind::StageFailure,
            JobError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        JobError::InvalidInput(message.into())
    }
}

/// Error detail carried by a FAILED job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
}

impl ErrorInfo {
    pub fn stage_failure(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::StageFailure,
            message: message.into(),
            stage: Some(stage),
        }
    }
}

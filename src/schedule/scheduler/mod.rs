pub mod cleanup;
mod orchestrator;
mod runner;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use regex::Regex;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use cleanup::CleanupScheduler;
pub use orchestrator::{align_translation, normalize_transcript, JobOrchestrator};
pub use runner::{Interrupt, StageRunner};

use crate::config::Config;
use crate::error::JobError;
use crate::schedule::processors::StageSet;
use crate::schedule::types::{
    check_stage_table, ArtifactKind, Artifacts, Job, JobRequest, JobSource, JobStatus, JobSummary,
};
use crate::storage::job::JobStore;
use crate::utils::http::truncate_preview;

pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const MAX_RECENT_LIMIT: usize = 100;
pub const PREVIEW_CHARS: usize = 2000;

/// Process-wide entry point: accepts jobs, runs one task per job and answers
/// queries from the store.
pub struct JobSupervisor {
    store: Arc<dyn JobStore>,
    orchestrator: Arc<JobOrchestrator>,
    cleanup: Arc<CleanupScheduler>,
    stages: StageSet,
    source_pattern: Regex,
    cancellation_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobSupervisor {
    pub fn new(config: &Config, store: Arc<dyn JobStore>, stages: StageSet) -> anyhow::Result<Self> {
        check_stage_table().map_err(|e| anyhow!("invalid stage table: {}", e))?;
        let source_pattern = Regex::new(&config.source_url_pattern)?;
        let cleanup = CleanupScheduler::new(config.upload_cleanup_delay);
        let orchestrator = Arc::new(JobOrchestrator::new(
            store.clone(),
            stages.clone(),
            cleanup.clone(),
            config.output_dir.clone(),
        ));

        Ok(Self {
            store,
            orchestrator,
            cleanup,
            stages,
            source_pattern,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn cleanup(&self) -> &Arc<CleanupScheduler> {
        &self.cleanup
    }

    fn check_url(&self, url: &str) -> Result<(), JobError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(JobError::invalid_input("URL is required"));
        }
        if !self.source_pattern.is_match(url) {
            return Err(JobError::invalid_input(format!("Invalid YouTube URL: {}", url)));
        }
        Ok(())
    }

    async fn validate(&self, request: &JobRequest) -> Result<(), JobError> {
        match &request.source {
            JobSource::Url(url) => self.check_url(url)?,
            JobSource::Upload(path) => {
                let metadata = tokio::fs::metadata(path)
                    .await
                    .map_err(|_| JobError::invalid_input(format!("Uploaded file not found: {}", path.display())))?;
                if !metadata.is_file() || metadata.len() == 0 {
                    return Err(JobError::invalid_input("Uploaded file is empty"));
                }
            }
        }
        if let Some(range) = &request.time_range {
            range.validate()?;
        }
        Ok(())
    }

    /// Validates the request, records the job and starts its pipeline.
    /// Returns as soon as the job exists.
    pub async fn submit(&self, request: JobRequest) -> Result<String, JobError> {
        self.validate(&request).await?;
        let request = match request.source {
            JobSource::Url(url) => JobRequest::url(url.trim()).with_time_range(request.time_range),
            JobSource::Upload(_) => request,
        };

        let job_id = self.store.create(request).await;
        let token = CancellationToken::new();
        self.cancellation_tokens
            .write()
            .await
            .insert(job_id.clone(), token.clone());

        let orchestrator = self.orchestrator.clone();
        let tokens = self.cancellation_tokens.clone();
        let id = job_id.clone();
        let handle = tokio::spawn(async move {
            orchestrator.run(&id, token).await;
            tokens.write().await.remove(&id);
        });

        let mut workers = self.workers.lock().await;
        workers.retain(|worker| !worker.is_finished());
        workers.push(handle);

        info!("Submitted job {}", job_id);
        Ok(job_id)
    }

    pub async fn status(&self, job_id: &str) -> Result<Job, JobError> {
        self.store.get(job_id).await
    }

    /// Requests cooperative cancellation. The job turns CANCELLED at its next
    /// checkpoint; the returned snapshot may still show the running stage.
    pub async fn cancel(&self, job_id: &str) -> Result<Job, JobError> {
        let job = finished_is_final(self.store.get(job_id).await?)?;
        if job.status == JobStatus::Cancelled {
            return Ok(job);
        }

        let token = self.cancellation_tokens.read().await.get(job_id).cloned();
        let job = match token {
            Some(token) => {
                token.cancel();
                warn!("Cancellation requested for job {}", job_id);
                self.store
                    .update(
                        job_id,
                        Box::new(|job| job.message = Some("Cancellation requested".to_string())),
                    )
                    .await?
            }
            // the task finished between the read and the lookup
            None => self.store.get(job_id).await?,
        };
        // the job may have reached a terminal state while the token fired
        finished_is_final(job)
    }

    /// Artifacts of a COMPLETED job. Reading them postpones the deferred
    /// upload cleanup.
    pub async fn results(&self, job_id: &str) -> Result<Artifacts, JobError> {
        let job = self.store.get(job_id).await?;
        let not_ready = JobError::NotReady {
            job_id: job_id.to_string(),
            status: job.status,
        };
        if job.status != JobStatus::Completed {
            return Err(not_ready);
        }
        let artifacts = job.artifacts.ok_or(not_ready)?;
        self.cleanup.touch(job_id);
        Ok(artifacts)
    }

    pub async fn recent(&self, limit: usize) -> Vec<JobSummary> {
        if limit == 0 {
            return Vec::new();
        }
        self.store.list(limit.min(MAX_RECENT_LIMIT)).await
    }

    /// Location of a rendered document of a COMPLETED job.
    pub async fn artifact_path(&self, job_id: &str, kind: ArtifactKind) -> Result<PathBuf, JobError> {
        let artifacts = self.results(job_id).await?;
        let path = artifacts
            .files
            .get(kind)
            .cloned()
            .ok_or_else(|| JobError::NotFound(format!("{} file for job {}", kind, job_id)))?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(JobError::NotFound(format!("{} file for job {}", kind, job_id)));
        }
        Ok(path)
    }

    /// The first characters of a rendered document's text.
    pub async fn preview(&self, job_id: &str, kind: ArtifactKind) -> Result<String, JobError> {
        let path = self.artifact_path(job_id, kind).await?;
        let text = match kind {
            ArtifactKind::Pdf => tokio::task::spawn_blocking(move || pdf_text(&path))
                .await
                .map_err(|e| JobError::Internal(e.to_string()))?,
            ArtifactKind::Markdown | ArtifactKind::Srt => tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| JobError::Internal(format!("failed to read {}: {}", path.display(), e))),
        }?;
        Ok(truncate_preview(&text, PREVIEW_CHARS))
    }

    /// Grammar check plus an availability check. Returns the source title.
    pub async fn validate_url(&self, url: &str) -> Result<String, JobError> {
        self.check_url(url)?;
        self.stages
            .downloader
            .lookup_title(url.trim())
            .await
            .map_err(|e| JobError::invalid_input(format!("Video is not available: {:#}", e)))
    }

    /// Cancels every running job and waits up to `grace` for their tasks.
    pub async fn shutdown(&self, grace: Duration) {
        let tokens: Vec<CancellationToken> = self.cancellation_tokens.read().await.values().cloned().collect();
        info!("Shutting down, cancelling {} active job(s)", tokens.len());
        for token in tokens {
            token.cancel();
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        let wait_all = async {
            for worker in workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(grace, wait_all).await.is_err() {
            warn!("Some jobs did not stop within {:?}", grace);
        }
        self.cleanup.cancel_all();
    }
}

fn pdf_text(path: &std::path::Path) -> Result<String, JobError> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| JobError::Internal(format!("failed to open {}: {}", path.display(), e)))?;
    let mut text = String::new();
    for (page_number, _) in doc.get_pages() {
        if let Ok(page_text) = doc.extract_text(&[page_number]) {
            text.push_str(&page_text);
            text.push('\n');
        }
    }
    Ok(text)
}

/// COMPLETED and FAILED jobs cannot be cancelled.
fn finished_is_final(job: Job) -> Result<Job, JobError> {
    match job.status {
        JobStatus::Completed | JobStatus::Failed => Err(JobError::InvalidState {
            job_id: job.id.clone(),
            status: job.status,
        }),
        _ => Ok(job),
    }
}

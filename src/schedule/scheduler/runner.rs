use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::JobError;
use crate::schedule::processors::StageContext;
use crate::schedule::types::{Job, Stage};
use crate::storage::job::JobStore;

/// Why a job stopped before COMPLETED.
#[derive(Debug)]
pub enum Interrupt {
    Cancelled,
    Failed { stage: Stage, message: String },
    /// The record vanished or was finalized by someone else.
    Lost(JobError),
}

/// Runs one stage of one job: moves the record into the stage, makes the
/// collaborator call and marks the stage done.
pub struct StageRunner {
    job_id: String,
    store: Arc<dyn JobStore>,
    cancel: CancellationToken,
}

impl StageRunner {
    pub fn new(job_id: impl Into<String>, store: Arc<dyn JobStore>, cancel: CancellationToken) -> Self {
        Self {
            job_id: job_id.into(),
            store,
            cancel,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Cancellation checkpoint.
    pub fn checkpoint(&self) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            warn!("Job {} cancelled at checkpoint", self.job_id);
            return Err(Interrupt::Cancelled);
        }
        Ok(())
    }

    pub async fn run<T, F, Fut>(&self, stage: Stage, call: F) -> Result<T, Interrupt>
    where
        F: FnOnce(StageContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.checkpoint()?;
        self.enter(stage).await?;

        let ctx = StageContext::new(self.job_id.clone(), stage, self.cancel.clone(), self.store.clone());
        let output = match call(ctx).await {
            Ok(output) => output,
            // a stage that gave up because of cancellation is not a failure
            Err(e) if self.cancel.is_cancelled() => {
                warn!("Job {} {} stage stopped by cancellation: {:#}", self.job_id, stage, e);
                return Err(Interrupt::Cancelled);
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Job {} {} stage failed: {}", self.job_id, stage, message);
                return Err(Interrupt::Failed { stage, message });
            }
        };

        self.write(move |job| job.progress.complete(stage)).await?;
        Ok(output)
    }

    async fn enter(&self, stage: Stage) -> Result<(), Interrupt> {
        let spec = stage.spec();
        let job = self
            .write(move |job| {
                job.status = spec.status;
                job.progress.raise(stage, spec.initial_progress);
                job.message = Some(spec.message.to_string());
            })
            .await?;
        info!("Job {} -> {} [{}]", self.job_id, job.status, job.progress);
        Ok(())
    }

    /// Writes the terminal state. Unlike [`StageRunner::write`] the resulting
    /// snapshot is expected to be terminal.
    pub async fn finalize<F>(&self, mutate: F) -> Result<Job, JobError>
    where
        F: FnOnce(&mut Job) + Send + 'static,
    {
        self.store.update(&self.job_id, Box::new(mutate)).await
    }

    /// Applies a mutation, treating a finalized or missing record as lost.
    pub async fn write<F>(&self, mutate: F) -> Result<Job, Interrupt>
    where
        F: FnOnce(&mut Job) + Send + 'static,
    {
        let job = self
            .store
            .update(&self.job_id, Box::new(mutate))
            .await
            .map_err(Interrupt::Lost)?;
        if job.status.is_terminal() {
            return Err(Interrupt::Lost(JobError::InvalidState {
                job_id: self.job_id.clone(),
                status: job.status,
            }));
        }
        Ok(job)
    }
}

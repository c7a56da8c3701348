use async_trait::async_trait;

use crate::error::JobError;
use crate::schedule::types::{Job, JobRequest, JobSummary};

pub mod memory;

pub use memory::InMemoryJobStore;

/// Read-modify-write step applied to a job record under its lock.
pub type JobMutator = Box<dyn FnOnce(&mut Job) + Send + 'static>;

/// Single source of truth for job state.
///
/// Reads return owned snapshots. Writes go through [`JobStore::update`], which
/// serializes concurrent writers of the same job and leaves terminal jobs
/// untouched.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Inserts a fresh INITIATED job and returns its id.
    async fn create(&self, request: JobRequest) -> String;
    async fn get(&self, job_id: &str) -> Result<Job, JobError>;
    /// Applies `mutator` atomically and returns the resulting snapshot. A job
    /// already in a terminal state is returned unchanged.
    async fn update(&self, job_id: &str, mutator: JobMutator) -> Result<Job, JobError>;
    /// Most recently updated first.
    async fn list(&self, limit: usize) -> Vec<JobSummary>;
    async fn delete(&self, job_id: &str) -> Result<(), JobError>;
}

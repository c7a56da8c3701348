use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{JobMutator, JobStore};
use crate::error::JobError;
use crate::schedule::types::{Job, JobRequest, JobSummary};

struct Entry {
    job: Job,
    // logical update clock; orders records when wall-clock timestamps tie
    touched: u64,
}

/// Process-lifetime job registry.
///
/// The map lock is only held to look records up, insert or evict them; each
/// record has its own mutex, so writers of different jobs never wait on each
/// other. Once the number of records exceeds `capacity`, the least recently
/// updated records that are no longer active are evicted.
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, Arc<Mutex<Entry>>>>,
    capacity: usize,
    clock: AtomicU64,
}

impl InMemoryJobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn entry(&self, job_id: &str) -> Option<Arc<Mutex<Entry>>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
    }

    /// Evicts the oldest non-active records until the bound holds again. The
    /// record that triggered the check is never chosen.
    fn evict_overflow(&self, keep: &str) -> Vec<String> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.len() <= self.capacity {
            return Vec::new();
        }

        let mut candidates: Vec<(u64, String)> = jobs
            .iter()
            .filter(|(id, _)| id.as_str() != keep)
            .filter_map(|(id, entry)| {
                let entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
                (!entry.job.status.is_active()).then(|| (entry.touched, id.clone()))
            })
            .collect();
        candidates.sort_unstable();

        let mut evicted = Vec::new();
        for (_, id) in candidates {
            if jobs.len() <= self.capacity {
                break;
            }
            jobs.remove(&id);
            evicted.push(id);
        }

        if !evicted.is_empty() {
            info!("Evicted {} job(s) to stay within bound {}: {:?}", evicted.len(), self.capacity, evicted);
        }
        if jobs.len() > self.capacity {
            debug!("Job store holds {} records over bound {}, remaining records are active", jobs.len(), self.capacity);
        }
        evicted
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, request: JobRequest) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = Entry {
            job: Job::new(id.clone(), request),
            touched: self.tick(),
        };
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(Mutex::new(entry)));
        info!("Created job {}", id);
        self.evict_overflow(&id);
        id
    }

    async fn get(&self, job_id: &str) -> Result<Job, JobError> {
        let entry = self
            .entry(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entry.job.clone())
    }

    async fn update(&self, job_id: &str, mutator: JobMutator) -> Result<Job, JobError> {
        let entry = self
            .entry(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        let snapshot = {
            let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
            let current = entry.job.status;
            if current.is_terminal() {
                debug!("Ignoring update of job {} in terminal state {}", job_id, current);
                return Ok(entry.job.clone());
            }

            // mutate a copy so readers never see a half-applied change
            let mut next = entry.job.clone();
            mutator(&mut next);
            if !current.can_transition_to(next.status) {
                warn!("Rejected transition of job {} from {} to {}", job_id, current, next.status);
                return Err(JobError::InvalidState {
                    job_id: job_id.to_string(),
                    status: current,
                });
            }

            next.updated_at = Utc::now();
            entry.job = next;
            entry.touched = self.tick();
            entry.job.clone()
        };

        self.evict_overflow(job_id);
        Ok(snapshot)
    }

    async fn list(&self, limit: usize) -> Vec<JobSummary> {
        let entries: Vec<_> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut summaries: Vec<(u64, JobSummary)> = entries
            .iter()
            .map(|entry| {
                let entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
                (entry.touched, entry.job.summary())
            })
            .collect();
        summaries.sort_by(|a, b| b.0.cmp(&a.0));
        summaries.into_iter().take(limit).map(|(_, summary)| summary).collect()
    }

    async fn delete(&self, job_id: &str) -> Result<(), JobError> {
        let removed = self
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
        match removed {
            Some(_) => {
                info!("Deleted job {}", job_id);
                Ok(())
            }
            None => Err(JobError::NotFound(job_id.to_string())),
        }
    }
}

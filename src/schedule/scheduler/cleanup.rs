use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct Pending {
    paths: Vec<PathBuf>,
    token: CancellationToken,
    generation: u64,
}

/// Deferred removal of files a finished job no longer needs.
///
/// Each job has at most one pending removal. Touching the job restarts the
/// full delay, so a file is never removed while it is still being read.
pub struct CleanupScheduler {
    delay: Duration,
    pending: Mutex<HashMap<String, Pending>>,
    generation: AtomicU64,
}

impl CleanupScheduler {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Removes `paths` once the delay elapses, replacing any earlier schedule
    /// for the same job.
    pub fn schedule(self: &Arc<Self>, job_id: &str, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        let generation = self.next_generation();
        let token = CancellationToken::new();
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                job_id.to_string(),
                Pending {
                    paths,
                    token: token.clone(),
                    generation,
                },
            );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        debug!("Scheduled cleanup for job {} in {:?}", job_id, self.delay);
        let scheduler = Arc::clone(self);
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(scheduler.delay) => {}
                _ = token.cancelled() => return,
            }
            scheduler.fire(&job_id, generation).await;
        });
    }

    async fn fire(&self, job_id: &str, generation: u64) {
        let paths = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.get(job_id) {
                Some(entry) if entry.generation == generation => pending.remove(job_id).map(|e| e.paths),
                _ => None,
            }
        };
        if let Some(paths) = paths {
            info!("Running deferred cleanup for job {}", job_id);
            remove_files(&paths).await;
        }
    }

    /// Postpones a pending removal by a full delay. Returns whether one was
    /// pending.
    pub fn touch(self: &Arc<Self>, job_id: &str) -> bool {
        let paths = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .map(|entry| entry.paths.clone());
        match paths {
            Some(paths) => {
                debug!("Postponing cleanup for job {}", job_id);
                self.schedule(job_id, paths);
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_id)
    }

    /// Drops every pending removal without touching the files.
    pub fn cancel_all(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, entry) in pending.drain() {
            entry.token.cancel();
        }
    }
}

/// Removes files, ignoring the ones already gone.
pub async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => info!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

//! Named periodic jobs
//!
//! A job runs its callback, sleeps for its interval and repeats until it is
//! stopped. Starting a job that is already running is a no-op. A failing or
//! panicking callback is logged and the loop carries on; only
//! [`JobManager::stop_job`] (which a callback may call on its own job) or
//! [`JobManager::stop_all_jobs`] ends it.

use crate::dispatcher::panic_message;
use crate::error::Result;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

struct JobEntry {
    token: CancellationToken,
    generation: u64,
}

/// Registry of running periodic jobs
#[derive(Clone, Default)]
pub struct JobManager {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    generation: Arc<AtomicU64>,
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `callback` every `interval` under `id`
    ///
    /// The first run happens immediately. Returns false without doing
    /// anything if a job with this id is already running.
    pub async fn start_job<F>(&self, id: impl Into<String>, callback: F, interval: Duration) -> bool
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let id = id.into();
        let mut jobs = self.jobs.lock().await;
        if jobs.get(&id).is_some_and(|job| !job.token.is_cancelled()) {
            tracing::debug!(job = %id, "Job already running");
            return false;
        }

        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        jobs.insert(
            id.clone(),
            JobEntry {
                token: token.clone(),
                generation,
            },
        );
        drop(jobs);

        let manager = self.clone();
        tokio::spawn(async move {
            manager
                .run_job(&id, callback, interval, token, generation)
                .await
        });
        true
    }

    async fn run_job<F>(
        &self,
        id: &str,
        callback: F,
        interval: Duration,
        token: CancellationToken,
        generation: u64,
    ) where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        tracing::info!(job = %id, interval_ms = interval.as_millis() as u64, "Job started");

        loop {
            match AssertUnwindSafe(callback()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(job = %id, error = %e, "Job callback failed"),
                Err(panic) => tracing::error!(
                    job = %id,
                    panic = %panic_message(panic.as_ref()),
                    "Job callback panicked"
                ),
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        // A newer job may have taken the id after this one was stopped
        let mut jobs = self.jobs.lock().await;
        if jobs.get(id).is_some_and(|job| job.generation == generation) {
            jobs.remove(id);
        }
        tracing::info!(job = %id, "Job stopped");
    }

    /// Stop a job. Returns false if no job has this id.
    pub async fn stop_job(&self, id: &str) -> bool {
        match self.jobs.lock().await.remove(id) {
            Some(job) => {
                job.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop every job and return how many were running
    pub async fn stop_all_jobs(&self) -> usize {
        let jobs: Vec<JobEntry> = self.jobs.lock().await.drain().map(|(_, job)| job).collect();
        for job in &jobs {
            job.token.cancel();
        }
        jobs.len()
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.jobs
            .lock()
            .await
            .get(id)
            .is_some_and(|job| !job.token.is_cancelled())
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

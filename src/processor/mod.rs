//! Task processing: download, extract, hand off for upload
//!
//! [`TaskProcessor`] is registered as the WAITING handler. It drives one task
//! through its stages inline, so by the time the handler returns the task is
//! terminal and the queue worker moves on.
//!
//! Split into focused submodules:
//! - [`stages`] - Download polling and extraction
//! - [`cleanup`] - Removal of handles and intermediate files on every exit path

mod cleanup;
mod stages;


pub use cleanup::HandleRelease;
pub(crate) use cleanup::remove_task_files;

use crate::config::{Config, RetryConfig};
use crate::dispatcher::StatusHandler;
use crate::download::DownloadEngine;
use crate::error::{ErrorClass, Result};
use crate::extraction::SubtitleExtractor;
use crate::task::Task;
use crate::types::{TaskId, TaskSource, TaskStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Drives tasks through DOWNLOADING, EXTRACTING and UPLOADING
pub struct TaskProcessor {
    download_dir: PathBuf,
    poll_interval: Duration,
    retry: RetryConfig,
    engine: Arc<dyn DownloadEngine>,
    extractor: Arc<dyn SubtitleExtractor>,
    /// Tasks currently being processed, for out-of-band lookups
    active: Mutex<HashMap<TaskId, Arc<Task>>>,
}

impl TaskProcessor {
    pub fn new(
        config: &Config,
        engine: Arc<dyn DownloadEngine>,
        extractor: Arc<dyn SubtitleExtractor>,
    ) -> Self {
        Self {
            download_dir: config.download_dir.clone(),
            poll_interval: config.poll_interval,
            retry: config.retry.clone(),
            engine,
            extractor,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Per-task staging directory under the download directory
    pub fn staging_dir(&self, id: &TaskId) -> PathBuf {
        staging_dir(&self.download_dir, id)
    }

    /// Whether the processor is currently working on `id`
    pub fn is_active(&self, id: &TaskId) -> bool {
        self.active_map().contains_key(id)
    }

    /// Ids of the tasks being processed
    pub fn active_task_ids(&self) -> Vec<TaskId> {
        self.active_map().keys().cloned().collect()
    }

    /// An in-flight task working on the same input as `source`
    pub fn active_for_source(&self, source: &TaskSource) -> Option<TaskId> {
        self.active_map()
            .values()
            .find(|t| t.source().same_input(source))
            .map(|t| t.id().clone())
    }

    /// Cancel an in-flight task directly
    ///
    /// Aborts the download handle right away instead of waiting for the next
    /// poll. Returns false if the processor is not working on `id`.
    pub async fn cancel_task(&self, id: &TaskId) -> bool {
        let Some(task) = self.active_map().get(id).cloned() else {
            return false;
        };

        // Token first, so the poll loop never mistakes the vanished handle for a failure
        task.cancel();
        if let Some(handle) = task.handle() {
            if let Err(e) = self.engine.cancel(&handle).await {
                warn!(task_id = %id, %handle, error = %e, "Failed to cancel download");
            }
        }
        info!(task_id = %id, "Canceled active task");
        true
    }

    fn active_map(&self) -> MutexGuard<'_, HashMap<TaskId, Arc<Task>>> {
        // Critical sections never panic, but recover the map rather than propagate poison
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn process(&self, task: &Arc<Task>) {
        let task_id = task.id().clone();
        let staging = self.staging_dir(&task_id);
        let result = self.run_stages(task, &staging).await;

        let canceled = task.cancel_token().is_cancelled()
            || result.as_ref().err().is_some_and(|e| e.is_cancellation());
        let keep_outputs = result.is_ok() && !canceled;

        cleanup::cleanup_task(self.engine.as_ref(), task, &staging, keep_outputs).await;

        match result {
            _ if canceled => {
                task.cancel();
                info!(task_id = %task_id, "Task processing canceled");
            }
            Ok(()) => {
                info!(
                    task_id = %task_id,
                    outputs = task.output_paths().len(),
                    elapsed_secs = task.elapsed().as_secs(),
                    "Task processed"
                );
            }
            Err(e) => {
                match e.class() {
                    ErrorClass::Unexpected => {
                        error!(task_id = %task_id, error = %e, error_debug = ?e, "Task failed")
                    }
                    class => warn!(task_id = %task_id, ?class, error = %e, "Task failed"),
                }
                task.fail(&e);
            }
        }
    }

    async fn run_stages(&self, task: &Arc<Task>, staging: &Path) -> Result<()> {
        let token = task.cancel_token().clone();

        let video = match task.source() {
            TaskSource::Url(url) => {
                task.transition(TaskStatus::Downloading)?;
                stages::download(self, task, url, staging, &token).await?
            }
            TaskSource::File { path, .. } => stages::check_local_file(path).await?,
        };
        task.set_local_path(Some(video.clone()));

        task.transition(TaskStatus::Extracting)?;
        let tracks = stages::extract(self.extractor.as_ref(), task, &video, staging, &token).await?;

        let outputs: Vec<PathBuf> = tracks.into_iter().map(|t| t.path).collect();
        task.enter_uploading(outputs)?;
        task.complete()?;
        Ok(())
    }
}

/// Drops the task from the active map even if processing unwinds
struct ActiveGuard<'a> {
    processor: &'a TaskProcessor,
    id: &'a TaskId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.processor.active_map().remove(self.id);
    }
}

pub(crate) fn staging_dir(download_dir: &Path, id: &TaskId) -> PathBuf {
    download_dir.join(id.as_str())
}

#[async_trait]
impl StatusHandler for TaskProcessor {
    async fn handle(&self, task: &Arc<Task>) -> Result<()> {
        if task.status() != TaskStatus::Waiting {
            debug!(task_id = %task.id(), status = %task.status(), "Task not waiting, skipping");
            return Ok(());
        }

        self.active_map().insert(task.id().clone(), task.clone());
        let _guard = ActiveGuard {
            processor: self,
            id: task.id(),
        };
        self.process(task).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "task-processor"
    }
}

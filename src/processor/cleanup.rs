//! Cleanup of download handles and intermediate files
//!
//! Runs on every exit path of task processing. Every step tolerates files
//! and handles that are already gone.

use crate::dispatcher::StatusHandler;
use crate::download::DownloadEngine;
use crate::error::Result;
use crate::task::Task;
use crate::utils::remove_path_quietly;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Release the download handle and remove intermediate files
///
/// Output files and the staging directory survive when `keep_outputs` is
/// set, so the upload handler can still read them.
pub(super) async fn cleanup_task(
    engine: &dyn DownloadEngine,
    task: &Task,
    staging: &Path,
    keep_outputs: bool,
) {
    release_handle(engine, task).await;

    if let Some(video) = task.local_path() {
        remove_path_quietly(&video).await;
        task.set_local_path(None);
    }

    if !keep_outputs {
        remove_task_files(task, staging).await;
    }
}

/// Abort or forget the task's transfer in the engine
///
/// The handle is cleared only after the engine call returns, so a release
/// interrupted midway is retried by [`HandleRelease`].
pub(crate) async fn release_handle(engine: &dyn DownloadEngine, task: &Task) {
    let Some(handle) = task.handle() else {
        return;
    };
    // Also clears the engine's record of a finished transfer
    match engine.cancel(&handle).await {
        Ok(_) => debug!(task_id = %task.id(), %handle, "Released download handle"),
        Err(e) => warn!(task_id = %task.id(), %handle, error = %e, "Failed to release download handle"),
    }
    task.set_handle(None);
}

/// Terminal handler releasing a download handle that processing left behind
///
/// Processing of a canceled task may be cut short before its own cleanup
/// reaches the engine. This handler runs from the queue worker after
/// processing has stopped, so the abort always completes.
pub struct HandleRelease {
    engine: Arc<dyn DownloadEngine>,
}

impl HandleRelease {
    pub fn new(engine: Arc<dyn DownloadEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl StatusHandler for HandleRelease {
    async fn handle(&self, task: &Arc<Task>) -> Result<()> {
        if task.is_terminal() && task.handle().is_some() {
            warn!(task_id = %task.id(), "Download handle outlived processing, releasing");
            release_handle(self.engine.as_ref(), task).await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "handle-release"
    }
}

/// Remove a task's outputs and its staging directory
pub(crate) async fn remove_task_files(task: &Task, staging: &Path) {
    for path in task.output_paths() {
        remove_path_quietly(&path).await;
    }
    if let Some(video) = task.local_path() {
        remove_path_quietly(&video).await;
    }
    remove_path_quietly(staging).await;
    debug!(task_id = %task.id(), staging = %staging.display(), "Removed task files");
}

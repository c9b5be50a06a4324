//! Terminal-status handlers and the outbound notification seam
//!
//! The chat transport lives outside this crate. It is reached through
//! [`NotificationSink`], wrapped in [`RetryingSink`] so transient send
//! failures are retried with the same bounded policy as the download engine.
//!
//! Handlers registered by the service:
//!
//! | Status    | Handlers                                                  |
//! |-----------|-----------------------------------------------------------|
//! | COMPLETED | [`HandleRelease`], [`UploadHandler`], [`StagingCleanup`]  |
//! | ERROR     | [`HandleRelease`], [`ErrorReporter`], [`StagingCleanup`]  |
//! | CANCELED  | [`HandleRelease`], [`StagingCleanup`]                     |
//!
//! [`HandleRelease`]: crate::processor::HandleRelease

use crate::config::RetryConfig;
use crate::dispatcher::StatusHandler;
use crate::error::{Error, Result};
use crate::processor::{remove_task_files, staging_dir};
use crate::retry::with_retry;
use crate::task::Task;
use crate::types::{ChatId, MessageId, TaskStatus};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Outbound messages to the requesting chat
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send the extracted subtitle files as a reply to `reply_to`
    async fn send_files(&self, chat_id: ChatId, reply_to: MessageId, paths: &[PathBuf])
    -> Result<()>;

    /// Tell the user a task failed
    async fn send_error(&self, chat_id: ChatId, reply_to: MessageId, message: &str) -> Result<()>;
}

/// Sink decorator that retries transient failures
pub struct RetryingSink {
    inner: Arc<dyn NotificationSink>,
    retry: RetryConfig,
}

impl RetryingSink {
    pub fn new(inner: Arc<dyn NotificationSink>, retry: RetryConfig) -> Self {
        Self { inner, retry }
    }
}

#[async_trait]
impl NotificationSink for RetryingSink {
    async fn send_files(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        paths: &[PathBuf],
    ) -> Result<()> {
        let inner = self.inner.as_ref();
        with_retry(&self.retry, "send files", move || {
            inner.send_files(chat_id, reply_to, paths)
        })
        .await
    }

    async fn send_error(&self, chat_id: ChatId, reply_to: MessageId, message: &str) -> Result<()> {
        let inner = self.inner.as_ref();
        with_retry(&self.retry, "send error", move || {
            inner.send_error(chat_id, reply_to, message)
        })
        .await
    }
}

/// Sends a completed task's subtitles to the user
///
/// An upload failure does not change the terminal status. It is recorded on
/// the task and reported to the user instead.
pub struct UploadHandler {
    sink: Arc<dyn NotificationSink>,
}

impl UploadHandler {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl StatusHandler for UploadHandler {
    async fn handle(&self, task: &Arc<Task>) -> Result<()> {
        if task.status() != TaskStatus::Completed {
            return Ok(());
        }
        let paths = task.output_paths();
        if paths.is_empty() {
            tracing::warn!(task_id = %task.id(), "Completed task has no outputs to upload");
            return Ok(());
        }

        let reply_to = task.command_message_id();
        match self.sink.send_files(task.chat_id(), reply_to, &paths).await {
            Ok(()) => {
                tracing::info!(task_id = %task.id(), files = paths.len(), "Uploaded subtitles");
                Ok(())
            }
            Err(e) => {
                tracing::error!(task_id = %task.id(), error = %e, "Failed to upload subtitles");
                task.set_error_message(format!("Upload failed: {}", e));
                self.sink
                    .send_error(
                        task.chat_id(),
                        reply_to,
                        &format!("Failed to upload subtitles: {}", e),
                    )
                    .await
            }
        }
    }

    fn name(&self) -> &str {
        "upload"
    }
}

/// The one place a failed task is reported to the user
pub struct ErrorReporter {
    sink: Arc<dyn NotificationSink>,
}

impl ErrorReporter {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl StatusHandler for ErrorReporter {
    async fn handle(&self, task: &Arc<Task>) -> Result<()> {
        if task.status() != TaskStatus::Error {
            return Ok(());
        }
        let message = task
            .with_state(|s| s.error_message.clone())
            .unwrap_or_else(|| "Unknown error".to_string());

        self.sink
            .send_error(task.chat_id(), task.command_message_id(), &message)
            .await
            .map_err(|e| Error::Notification(format!("failed to report error: {}", e)))
    }

    fn name(&self) -> &str {
        "error-reporter"
    }
}

/// Removes a finished task's staging directory, outputs and video
pub struct StagingCleanup {
    download_dir: PathBuf,
}

impl StagingCleanup {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
        }
    }
}

#[async_trait]
impl StatusHandler for StagingCleanup {
    async fn handle(&self, task: &Arc<Task>) -> Result<()> {
        if !task.is_terminal() {
            return Ok(());
        }
        let staging = staging_dir(&self.download_dir, task.id());
        remove_task_files(task, &staging).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "staging-cleanup"
    }
}

//! Service facade wiring the queue, processor, handlers and jobs together

use crate::config::Config;
use crate::dispatcher::StatusDispatcher;
use crate::download::DownloadEngine;
use crate::error::{Error, Result};
use crate::extraction::SubtitleExtractor;
use crate::jobs::JobManager;
use crate::notify::{ErrorReporter, NotificationSink, RetryingSink, StagingCleanup, UploadHandler};
use crate::processor::{HandleRelease, TaskProcessor};
use crate::queue::TaskQueue;
use crate::status::{StatusBoard, StatusDisplay};
use crate::task::{NewTask, Task, TaskSnapshot};
use crate::types::{Event, TaskId, TaskSource, TaskStatus};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

/// Job id of the periodic status refresh
pub const STATUS_JOB_ID: &str = "status";

/// Broadcast capacity for lifecycle events
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Attempts at drawing a task id that is not already tracked
const ID_ATTEMPTS: usize = 3;

/// Subtitle extraction service
///
/// Owns the task queue and everything registered on its dispatcher. Clone
/// the collaborators in, call [`SubtitleService::submit`] per request and
/// [`SubtitleService::shutdown`] on exit.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use subtitle_dl::{Config, SubtitleService, run_with_shutdown};
/// use subtitle_dl::download::Aria2Engine;
/// use subtitle_dl::extraction::MkvToolNixExtractor;
/// use subtitle_dl::notify::NotificationSink;
///
/// # async fn example(sink: Arc<dyn NotificationSink>) -> subtitle_dl::Result<()> {
/// let config = Config::from_env()?;
/// let engine = Arc::new(Aria2Engine::new(&config.aria2)?);
/// let extractor = Arc::new(MkvToolNixExtractor::from_config(&config.tools)?);
///
/// let service = SubtitleService::new(config, engine, extractor, sink).await?;
/// run_with_shutdown(service).await
/// # }
/// ```
pub struct SubtitleService {
    config: Arc<Config>,
    queue: TaskQueue,
    processor: Arc<TaskProcessor>,
    jobs: JobManager,
    event_tx: broadcast::Sender<Event>,
    board: Mutex<Option<Arc<StatusBoard>>>,
}

impl SubtitleService {
    /// Validate the configuration, prepare the download directory and
    /// register every status handler
    pub async fn new(
        config: Config,
        engine: Arc<dyn DownloadEngine>,
        extractor: Arc<dyn SubtitleExtractor>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.download_dir)
            .await
            .map_err(|e| {
                Error::config(
                    "DOWNLOAD_DIR",
                    format!(
                        "cannot create download directory {}: {}",
                        config.download_dir.display(),
                        e
                    ),
                )
            })?;

        let sink: Arc<dyn NotificationSink> = Arc::new(RetryingSink::new(sink, config.retry.clone()));
        let processor = Arc::new(TaskProcessor::new(&config, engine.clone(), extractor.clone()));

        let mut dispatcher = StatusDispatcher::new();
        dispatcher.register(TaskStatus::Waiting, processor.clone());
        dispatcher.register_many(
            &[TaskStatus::Completed, TaskStatus::Error, TaskStatus::Canceled],
            Arc::new(HandleRelease::new(engine.clone())),
        );
        dispatcher.register(TaskStatus::Completed, Arc::new(UploadHandler::new(sink.clone())));
        dispatcher.register(TaskStatus::Error, Arc::new(ErrorReporter::new(sink)));
        dispatcher.register_many(
            &[TaskStatus::Completed, TaskStatus::Error, TaskStatus::Canceled],
            Arc::new(StagingCleanup::new(config.download_dir.clone())),
        );

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queue = TaskQueue::new(Arc::new(dispatcher), event_tx.clone(), config.poll_interval);

        tracing::info!(
            download_dir = %config.download_dir.display(),
            engine = engine.name(),
            extractor = extractor.name(),
            "Subtitle service ready"
        );

        Ok(Self {
            config: Arc::new(config),
            queue,
            processor,
            jobs: JobManager::new(),
            event_tx,
            board: Mutex::new(None),
        })
    }

    /// Queue a request and return the new task's id
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for an empty URL
    /// - [`Error::Duplicate`] if the same input is already being processed
    /// - [`Error::ShuttingDown`] once shutdown has begun
    pub async fn submit(&self, request: NewTask) -> Result<TaskId> {
        if let TaskSource::Url(url) = &request.source {
            if url.trim().is_empty() {
                return Err(Error::InvalidInput("empty URL".to_string()));
            }
        }

        if let Some(existing) = self.queue.find_duplicate(&request.source).await {
            tracing::info!(task_id = %existing, "Rejected duplicate submission");
            return Err(Error::Duplicate(format!(
                "this input is already being processed as task {}",
                existing
            )));
        }

        let mut last_error = None;
        for _ in 0..ID_ATTEMPTS {
            let id = TaskId::generate();
            match self.queue.add_task(Task::new(id.clone(), request.clone())).await {
                Ok(()) => return Ok(id),
                Err(e @ Error::Duplicate(_)) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Other("could not allocate a task id".into())))
    }

    /// Cancel one task. Returns false if it is unknown.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        // Abort the active download right away rather than at the next poll
        let aborted = self.processor.cancel_task(id).await;
        self.queue.cancel_task(id).await || aborted
    }

    /// Cancel every task and return how many were canceled
    pub async fn cancel_all(&self) -> usize {
        let canceled = self.queue.cancel_all_tasks().await;
        self.abort_active().await;
        canceled
    }

    /// Abort in-flight downloads right away rather than at the next poll
    async fn abort_active(&self) {
        for id in self.processor.active_task_ids() {
            self.processor.cancel_task(&id).await;
        }
    }

    /// Snapshots of every tracked task in submission order
    pub async fn tasks(&self) -> Vec<TaskSnapshot> {
        self.queue.get_all_tasks().await
    }

    /// Snapshot of one task
    pub async fn task(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.queue.get_task(id).await
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Start refreshing `display` every `refresh_interval`
    ///
    /// If the status job is already running its board is returned and
    /// `display` is ignored. The job stops by itself once no active tasks
    /// remain; call again after the next submission to bring it back.
    pub async fn start_status_updates(&self, display: Arc<dyn StatusDisplay>) -> Arc<StatusBoard> {
        let mut current = self.board.lock().await;
        if let Some(board) = current.as_ref() {
            if self.jobs.is_running(STATUS_JOB_ID).await {
                return board.clone();
            }
        }

        let board = Arc::new(StatusBoard::new(
            self.queue.clone(),
            display,
            self.jobs.clone(),
            STATUS_JOB_ID,
            self.config.status.page_size,
        ));
        let job_board = board.clone();
        self.jobs
            .start_job(
                STATUS_JOB_ID,
                move || {
                    let board = job_board.clone();
                    async move { board.refresh().await }.boxed()
                },
                self.config.refresh_interval,
            )
            .await;
        *current = Some(board.clone());
        board
    }

    /// Stop accepting tasks, stop jobs, cancel everything and wait for the worker
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down subtitle service");
        let stopped = self.jobs.stop_all_jobs().await;
        let canceled = self.cancel_all().await;
        self.queue.shutdown().await;
        tracing::info!(jobs_stopped = stopped, canceled, "Subtitle service stopped");
        Ok(())
    }

    /// Whether new submissions are accepted
    pub fn is_accepting(&self) -> bool {
        self.queue.is_accepting()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn processor(&self) -> &TaskProcessor {
        &self.processor
    }

    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }
}

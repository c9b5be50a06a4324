//! The task entity: immutable identity plus watched lifecycle state
//!
//! Identity fields never change after creation. Everything else lives in a
//! [`TaskState`] behind a `tokio::sync::watch` channel so readers take cheap
//! consistent snapshots and the queue worker can await a terminal status
//! without polling. Every status change goes through [`Task::transition`],
//! which enforces the lifecycle edges of [`TaskStatus::can_transition_to`].

use crate::error::{Error, ErrorClass, Result};
use crate::types::{ChatId, DownloadHandle, Event, MessageId, TaskId, TaskSource, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// A request as it arrives from the chat layer, before it gets an id
#[derive(Clone, Debug)]
pub struct NewTask {
    /// Chat the request came from
    pub chat_id: ChatId,
    /// Status message associated with the task
    pub message_id: MessageId,
    /// The user's original command message, replied to with results
    pub command_message_id: MessageId,
    /// Video source
    pub source: TaskSource,
}

/// Mutable lifecycle fields
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskState {
    /// Current lifecycle status
    pub status: TaskStatus,
    /// Progress of the current stage (0.0 to 100.0)
    pub progress: f64,
    /// Current speed in bytes per second
    pub speed: u64,
    /// Bytes downloaded so far
    pub downloaded_bytes: u64,
    /// Total bytes, 0 when unknown
    pub total_bytes: u64,
    /// Local video file, known up front for uploads and after download for URLs
    pub local_path: Option<PathBuf>,
    /// Message shown to the user on failure
    pub error_message: Option<String>,
    /// Failure class, set together with `error_message`
    pub error_class: Option<ErrorClass>,
    /// Download engine handle while a transfer exists
    pub handle: Option<DownloadHandle>,
    /// Extracted subtitle files, populated when UPLOADING begins
    pub output_paths: Vec<PathBuf>,
    /// When the queue worker picked the task up
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly when the status is terminal
    pub completed_at: Option<DateTime<Utc>>,
    /// Free-form collaborator data
    pub metadata: HashMap<String, String>,
}

impl TaskState {
    fn new(source: &TaskSource) -> Self {
        let local_path = match source {
            TaskSource::File { path, .. } => Some(path.clone()),
            TaskSource::Url(_) => None,
        };
        Self {
            status: TaskStatus::Waiting,
            progress: 0.0,
            speed: 0,
            downloaded_bytes: 0,
            total_bytes: 0,
            local_path,
            error_message: None,
            error_class: None,
            handle: None,
            output_paths: Vec::new(),
            started_at: None,
            completed_at: None,
            metadata: HashMap::new(),
        }
    }
}

/// Read-only copy of a task for rendering and inspection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task ID
    pub id: TaskId,
    /// Chat the request came from
    pub chat_id: ChatId,
    /// Status message
    pub message_id: MessageId,
    /// Original command message
    pub command_message_id: MessageId,
    /// Video source
    pub source: TaskSource,
    /// Basename of the source
    pub display_name: String,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// Time spent since the worker picked the task up
    pub elapsed: Duration,
    /// Lifecycle fields at the time of the snapshot
    #[serde(flatten)]
    pub state: TaskState,
}

/// One subtitle-extraction request
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    chat_id: ChatId,
    message_id: MessageId,
    command_message_id: MessageId,
    source: TaskSource,
    created_at: DateTime<Utc>,
    state: watch::Sender<TaskState>,
    cancel_token: CancellationToken,
    events: OnceLock<broadcast::Sender<Event>>,
}

impl Task {
    /// Create a WAITING task
    pub fn new(id: TaskId, request: NewTask) -> Self {
        let (state, _) = watch::channel(TaskState::new(&request.source));
        Self {
            id,
            chat_id: request.chat_id,
            message_id: request.message_id,
            command_message_id: request.command_message_id,
            source: request.source,
            created_at: Utc::now(),
            state,
            cancel_token: CancellationToken::new(),
            events: OnceLock::new(),
        }
    }

    /// Route lifecycle events to a broadcast channel. Only the first call takes effect.
    pub fn attach_events(&self, tx: broadcast::Sender<Event>) {
        self.events.set(tx).ok();
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = self.events.get() {
            tx.send(event).ok();
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn command_message_id(&self) -> MessageId {
        self.command_message_id
    }

    pub fn source(&self) -> &TaskSource {
        &self.source
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Token triggered when the task is canceled
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn status(&self) -> TaskStatus {
        self.state.borrow().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Run `f` against the current state without cloning it
    pub fn with_state<R>(&self, f: impl FnOnce(&TaskState) -> R) -> R {
        f(&self.state.borrow())
    }

    pub fn handle(&self) -> Option<DownloadHandle> {
        self.with_state(|s| s.handle.clone())
    }

    pub fn local_path(&self) -> Option<PathBuf> {
        self.with_state(|s| s.local_path.clone())
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.with_state(|s| s.output_paths.clone())
    }

    /// Basename of the URL path or local file
    pub fn display_name(&self) -> String {
        display_name_of(&self.source)
    }

    /// Time since the worker picked the task up, frozen once terminal
    pub fn elapsed(&self) -> Duration {
        self.with_state(|s| match s.started_at {
            None => Duration::ZERO,
            Some(start) => {
                let end = s.completed_at.unwrap_or_else(Utc::now);
                (end - start).to_std().unwrap_or_default()
            }
        })
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            chat_id: self.chat_id,
            message_id: self.message_id,
            command_message_id: self.command_message_id,
            source: self.source.clone(),
            display_name: self.display_name(),
            created_at: self.created_at,
            elapsed: self.elapsed(),
            state: self.state.borrow().clone(),
        }
    }

    /// Record the moment the worker picked the task up
    pub fn mark_started(&self) {
        self.state.send_if_modified(|s| {
            if s.started_at.is_none() {
                s.started_at = Some(Utc::now());
                true
            } else {
                false
            }
        });
    }

    /// Move to `next`, resetting stage progress
    ///
    /// Returns the previous status, or [`Error::InvalidTransition`] if the edge
    /// does not exist (including any move out of a terminal status).
    pub fn transition(&self, next: TaskStatus) -> Result<TaskStatus> {
        self.transition_with(next, |_| {})
    }

    fn transition_with(
        &self,
        next: TaskStatus,
        apply: impl FnOnce(&mut TaskState),
    ) -> Result<TaskStatus> {
        // send_if_modified always runs the closure, which overwrites this
        let mut outcome = Err(TaskStatus::Waiting);
        self.state.send_if_modified(|s| {
            if !s.status.can_transition_to(next) {
                outcome = Err(s.status);
                return false;
            }
            outcome = Ok(s.status);
            s.status = next;
            s.progress = if next == TaskStatus::Completed { 100.0 } else { 0.0 };
            if next != TaskStatus::Downloading {
                s.speed = 0;
            }
            if next.is_terminal() {
                s.completed_at = Some(Utc::now());
            }
            apply(s);
            true
        });

        match outcome {
            Ok(from) => {
                tracing::debug!(task_id = %self.id, %from, to = %next, "Task status changed");
                self.emit(Event::StatusChanged {
                    id: self.id.clone(),
                    from,
                    to: next,
                });
                self.emit_terminal(next);
                Ok(from)
            }
            Err(from) => Err(Error::InvalidTransition {
                id: self.id.to_string(),
                from,
                to: next,
            }),
        }
    }

    fn emit_terminal(&self, status: TaskStatus) {
        let event = match status {
            TaskStatus::Completed => Event::Completed {
                id: self.id.clone(),
                outputs: self.output_paths(),
            },
            TaskStatus::Error => {
                let (class, error) = self.with_state(|s| {
                    (
                        s.error_class.unwrap_or(ErrorClass::Unexpected),
                        s.error_message.clone().unwrap_or_default(),
                    )
                });
                Event::Failed {
                    id: self.id.clone(),
                    class,
                    error,
                }
            }
            TaskStatus::Canceled => Event::Canceled {
                id: self.id.clone(),
            },
            _ => return,
        };
        self.emit(event);
    }

    /// Enter UPLOADING with the extracted subtitle files in one step
    pub fn enter_uploading(&self, outputs: Vec<PathBuf>) -> Result<TaskStatus> {
        self.transition_with(TaskStatus::Uploading, move |s| {
            s.output_paths = outputs;
        })
    }

    /// Mark COMPLETED
    pub fn complete(&self) -> Result<TaskStatus> {
        self.transition(TaskStatus::Completed)
    }

    /// Mark ERROR with the user-facing message of `error`
    ///
    /// Returns false if the task was already terminal.
    pub fn fail(&self, error: &Error) -> bool {
        self.fail_with(error.user_message(), error.class())
    }

    /// Mark ERROR with an explicit message and class
    pub fn fail_with(&self, message: impl Into<String>, class: ErrorClass) -> bool {
        let message = message.into();
        self.transition_with(TaskStatus::Error, move |s| {
            s.error_message = Some(message);
            s.error_class = Some(class);
        })
        .is_ok()
    }

    /// Mark CANCELED and trigger the cancellation token
    ///
    /// Returns false if the task was already terminal. The token is triggered
    /// either way so in-flight work stops.
    pub fn cancel(&self) -> bool {
        let changed = self.transition(TaskStatus::Canceled).is_ok();
        self.cancel_token.cancel();
        changed
    }

    /// Update transfer counters. Progress never decreases within a stage.
    pub fn update_progress(&self, downloaded: u64, total: u64, speed: u64) {
        let mut percent = None;
        self.state.send_if_modified(|s| {
            if s.status.is_terminal() {
                return false;
            }
            s.downloaded_bytes = downloaded;
            s.total_bytes = total;
            s.speed = speed;
            if total > 0 {
                let p = (downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
                s.progress = s.progress.max(p);
            }
            percent = Some(s.progress);
            true
        });
        if let Some(percent) = percent {
            self.emit(Event::Progress {
                id: self.id.clone(),
                percent,
                speed_bps: speed,
            });
        }
    }

    /// Set stage progress directly (e.g. per extracted track). Never decreases.
    pub fn set_progress(&self, percent: f64) {
        self.state.send_if_modified(|s| {
            let p = percent.clamp(0.0, 100.0);
            if s.status.is_terminal() || p <= s.progress {
                return false;
            }
            s.progress = p;
            true
        });
    }

    pub fn set_handle(&self, handle: Option<DownloadHandle>) {
        self.state.send_modify(|s| s.handle = handle);
    }

    pub fn set_local_path(&self, path: Option<PathBuf>) {
        self.state.send_modify(|s| s.local_path = path);
    }

    /// Record a note on the task without touching its status
    pub fn set_error_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.state.send_modify(|s| s.error_message = Some(message));
    }

    pub fn insert_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        self.state.send_modify(|s| {
            s.metadata.insert(key, value);
        });
    }

    /// Wait until the status is terminal and return it
    pub async fn wait_terminal(&self) -> TaskStatus {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| s.status.is_terminal()).await {
            Ok(state) => state.status,
            // The sender lives in `self`, so the channel cannot close while we wait
            Err(_) => self.status(),
        }
    }
}

/// Basename of a task source, percent-decoded for URLs
pub fn display_name_of(source: &TaskSource) -> String {
    match source {
        TaskSource::Url(raw) => url::Url::parse(raw)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|name| !name.is_empty())
            .map(|name| {
                urlencoding::decode(&name)
                    .map(|d| d.into_owned())
                    .unwrap_or(name)
            })
            .unwrap_or_else(|| raw.clone()),
        TaskSource::File { path, .. } => file_name_lossy(path),
    }
}

fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

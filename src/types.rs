//! Core types for subtitle-dl

use crate::error::ErrorClass;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Unique identifier for a task
///
/// Short mixed-case base-62 string so it can be typed back in a
/// `/cancel_<id>` command.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a TaskId from an existing string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id from 48 random bits, at least 6 characters long
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut n: u64 = rng.gen_range(0..(1u64 << 48));
        let mut digits = Vec::with_capacity(9);
        while n > 0 {
            digits.push(BASE62[(n % 62) as usize]);
            n /= 62;
        }
        while digits.len() < 6 {
            digits.push(b'0');
        }
        digits.reverse();
        Self(digits.into_iter().map(char::from).collect())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Chat the request came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Message within a chat (status message or the original command)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task lifecycle status
///
/// ```text
/// WAITING -> DOWNLOADING -> EXTRACTING -> UPLOADING -> COMPLETED
///    \___________\______________\____________\______-> ERROR | CANCELED
/// ```
///
/// WAITING goes straight to EXTRACTING when the source is a local file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// In the queue, not yet picked up
    Waiting,
    /// Transferring the video
    Downloading,
    /// Extracting subtitle tracks
    Extracting,
    /// Handing subtitles to the chat layer
    Uploading,
    /// Finished successfully
    Completed,
    /// Failed
    Error,
    /// Canceled by the user
    Canceled,
}

impl TaskStatus {
    /// Number of states, for fixed-size tables indexed by status
    pub const COUNT: usize = 7;

    /// Every state in lifecycle order
    pub const ALL: [TaskStatus; Self::COUNT] = [
        TaskStatus::Waiting,
        TaskStatus::Downloading,
        TaskStatus::Extracting,
        TaskStatus::Uploading,
        TaskStatus::Completed,
        TaskStatus::Error,
        TaskStatus::Canceled,
    ];

    /// Position in [`TaskStatus::ALL`]
    pub fn index(self) -> usize {
        match self {
            TaskStatus::Waiting => 0,
            TaskStatus::Downloading => 1,
            TaskStatus::Extracting => 2,
            TaskStatus::Uploading => 3,
            TaskStatus::Completed => 4,
            TaskStatus::Error => 5,
            TaskStatus::Canceled => 6,
        }
    }

    /// COMPLETED, ERROR and CANCELED admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Canceled
        )
    }

    /// A stage that is being worked on (neither waiting nor finished)
    pub fn is_in_progress(self) -> bool {
        !self.is_terminal() && self != TaskStatus::Waiting
    }

    /// Whether `self -> next` is an edge of the lifecycle
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            Error | Canceled => true,
            Downloading => self == Waiting,
            Extracting => matches!(self, Waiting | Downloading),
            Uploading => self == Extracting,
            Completed => self == Uploading,
            Waiting => false,
        }
    }

    /// Display title ("Downloading")
    pub fn title(self) -> &'static str {
        match self {
            TaskStatus::Waiting => "Waiting",
            TaskStatus::Downloading => "Downloading",
            TaskStatus::Extracting => "Extracting",
            TaskStatus::Uploading => "Uploading",
            TaskStatus::Completed => "Completed",
            TaskStatus::Error => "Error",
            TaskStatus::Canceled => "Canceled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

/// Where a task's video comes from. Exactly one source per task.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    /// Remote URL fetched by the download engine
    Url(String),
    /// File already on local disk (uploaded through the chat)
    File {
        /// Local path
        path: PathBuf,
        /// Chat-layer identifier of the uploaded file, used for duplicate detection
        file_id: Option<String>,
    },
}

impl TaskSource {
    /// Whether two sources refer to the same input
    pub fn same_input(&self, other: &TaskSource) -> bool {
        match (self, other) {
            (TaskSource::Url(a), TaskSource::Url(b)) => a == b,
            (
                TaskSource::File {
                    path: pa,
                    file_id: fa,
                },
                TaskSource::File {
                    path: pb,
                    file_id: fb,
                },
            ) => match (fa, fb) {
                (Some(a), Some(b)) => a == b,
                _ => pa == pb,
            },
            _ => false,
        }
    }
}

/// One extracted subtitle track
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    /// ISO language code, "und" when unknown
    pub language: String,
    /// File format / extension ("srt", "ass", "sup", ...)
    pub format: String,
    /// Where the track was written
    pub path: PathBuf,
}

/// Opaque download engine handle (aria2 GID)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadHandle(pub String);

impl std::fmt::Display for DownloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of an in-flight transfer as reported by the download engine
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadStatus {
    /// Transfer finished successfully
    pub is_complete: bool,
    /// Transfer failed or was removed
    pub has_failed: bool,
    /// Engine-reported failure reason
    pub error_message: Option<String>,
    /// Bytes received so far
    pub completed_bytes: u64,
    /// Total size, 0 when unknown
    pub total_bytes: u64,
    /// Current speed in bytes per second
    pub speed: u64,
    /// Resulting file on disk, once known
    pub file_path: Option<PathBuf>,
}

impl DownloadStatus {
    /// Completion percentage (0.0 to 100.0)
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.completed_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        }
    }
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task added to the queue
    Queued {
        /// Task ID
        id: TaskId,
        /// Display name
        name: String,
    },

    /// Task moved to a new status
    StatusChanged {
        /// Task ID
        id: TaskId,
        /// Previous status
        from: TaskStatus,
        /// New status
        to: TaskStatus,
    },

    /// Progress update while downloading
    Progress {
        /// Task ID
        id: TaskId,
        /// Progress percentage (0.0 to 100.0)
        percent: f64,
        /// Current speed in bytes per second
        speed_bps: u64,
    },

    /// Task finished with subtitles
    Completed {
        /// Task ID
        id: TaskId,
        /// Extracted subtitle files
        outputs: Vec<PathBuf>,
    },

    /// Task failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Failure class
        class: ErrorClass,
        /// Error message
        error: String,
    },

    /// Task canceled
    Canceled {
        /// Task ID
        id: TaskId,
    },

    /// Task removed from tracking
    Removed {
        /// Task ID
        id: TaskId,
    },
}

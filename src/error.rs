//! Error types for subtitle-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Download, Extraction, Config, etc.)
//! - Classification into the task failure taxonomy ([`ErrorClass`])
//! - User-facing messages for the chat layer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for subtitle-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for subtitle-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "DOWNLOAD_DIR")
        key: Option<String>,
    },

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Subtitle extraction error
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// The video contained no subtitle tracks that could be extracted
    #[error("No subtitles found in video file")]
    NoSubtitles,

    /// Malformed request (bad URL, missing source)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Work was canceled cooperatively (task or subprocess)
    #[error("canceled: {0}")]
    Canceled(String),

    /// Task not tracked by the queue
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Duplicate task id or duplicate source
    #[error("duplicate task: {0}")]
    Duplicate(String),

    /// Status change that is not an edge of the task lifecycle
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        /// Task whose transition was rejected
        id: String,
        /// Current status
        from: crate::types::TaskStatus,
        /// Requested status
        to: crate::types::TaskStatus,
    },

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Collaborator failure that may succeed if retried (timeouts, rate limits)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Notification delivery failed (chat transport)
    #[error("notification error: {0}")]
    Notification(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (mkvmerge, mkvextract, nice)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Download engine errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The engine refused to start a transfer
    #[error("failed to start download: {reason}")]
    StartFailed {
        /// Reason reported by the engine
        reason: String,
    },

    /// The engine reported the transfer as failed
    #[error("Download failed: {reason}")]
    Failed {
        /// Reason reported by the engine
        reason: String,
    },

    /// The engine no longer knows about the handle
    #[error("download {handle} not found")]
    HandleNotFound {
        /// The engine handle that disappeared
        handle: String,
    },

    /// The engine returned an RPC-level error
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// Engine error code
        code: i64,
        /// Engine error message
        message: String,
    },

    /// The transfer completed but produced no usable file
    #[error("download complete but file does not exist: {path}")]
    MissingFile {
        /// Path where the file was expected
        path: PathBuf,
    },
}

/// Subtitle extraction errors
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Could not parse track metadata
    #[error("failed to parse track metadata for {file}: {reason}")]
    ProbeFailed {
        /// The video file being probed
        file: PathBuf,
        /// Parse failure reason
        reason: String,
    },

    /// Required binary is not installed
    #[error("{tool} not found (install MKVToolNix or configure its path)")]
    ToolNotFound {
        /// Name of the missing tool
        tool: &'static str,
    },

    /// A command exceeded its timeout
    #[error("command timed out after {secs}s: {command}")]
    TimedOut {
        /// The command line that timed out
        command: String,
        /// Timeout in seconds
        secs: u64,
    },

    /// The input video does not exist
    #[error("video file not found: {path}")]
    InputMissing {
        /// Missing path
        path: PathBuf,
    },
}

/// Failure taxonomy used to decide retry behaviour and user messaging
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network/timeout from a collaborator; retried with backoff then surfaced
    Transient,
    /// Extraction produced zero tracks; terminal, never retried
    NoContent,
    /// Malformed URL or missing source; terminal
    InvalidInput,
    /// Cooperative cancellation; not a failure
    Cancellation,
    /// Anything else
    Unexpected,
}

impl Error {
    /// Shorthand for a configuration error bound to a key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Classify this error into the failure taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::NoSubtitles => ErrorClass::NoContent,
            Error::InvalidInput(_) => ErrorClass::InvalidInput,
            Error::Canceled(_) => ErrorClass::Cancellation,
            Error::Transient(_) => ErrorClass::Transient,
            Error::Network(e) if e.is_timeout() || e.is_connect() => ErrorClass::Transient,
            Error::Io(e) if crate::retry::is_transient_io(e) => ErrorClass::Transient,
            _ => ErrorClass::Unexpected,
        }
    }

    /// Whether this error represents cancellation rather than failure
    pub fn is_cancellation(&self) -> bool {
        self.class() == ErrorClass::Cancellation
    }

    /// Message shown to the requesting user
    pub fn user_message(&self) -> String {
        match self.class() {
            ErrorClass::NoContent => "No subtitles were found in this video file.".to_string(),
            ErrorClass::InvalidInput => match self {
                Error::InvalidInput(msg) if !msg.is_empty() => {
                    format!("Please provide a video file or URL. ({})", msg)
                }
                _ => "Please provide a video file or URL.".to_string(),
            },
            ErrorClass::Cancellation => "Task was canceled.".to_string(),
            ErrorClass::Transient | ErrorClass::Unexpected => {
                format!("Error processing video: {}", self)
            }
        }
    }
}

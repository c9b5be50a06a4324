//! # subtitle-dl
//!
//! Task orchestration for a chat bot that pulls subtitle tracks out of videos.
//!
//! A request (a video URL or an uploaded file) becomes a [`Task`] that moves
//! through `WAITING → DOWNLOADING → EXTRACTING → UPLOADING → COMPLETED`, or
//! ends in `ERROR` / `CANCELED`. One task is processed at a time.
//!
//! ## Architecture
//!
//! - [`TaskQueue`] - FIFO admission with a single lazily started worker
//! - [`StatusDispatcher`] - handlers registered per status, run on every transition
//! - [`TaskProcessor`] - the WAITING handler: download, extract, hand off
//! - [`JobManager`] - named periodic jobs, used for the live status view
//! - [`SubtitleService`] - wires the above together with the built-in handlers
//!
//! External systems stay behind traits: [`download::DownloadEngine`] (aria2),
//! [`extraction::SubtitleExtractor`] (MKVToolNix), [`notify::NotificationSink`]
//! and [`status::StatusDisplay`] (the chat transport).
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use subtitle_dl::download::Aria2Engine;
//! use subtitle_dl::extraction::MkvToolNixExtractor;
//! use subtitle_dl::notify::NotificationSink;
//! use subtitle_dl::{ChatId, Config, MessageId, NewTask, SubtitleService, TaskSource};
//!
//! # async fn example(sink: Arc<dyn NotificationSink>) -> subtitle_dl::Result<()> {
//! let config = Config::from_env()?;
//! let engine = Arc::new(Aria2Engine::new(&config.aria2)?);
//! let extractor = Arc::new(MkvToolNixExtractor::from_config(&config.tools)?);
//! let service = SubtitleService::new(config, engine, extractor, sink).await?;
//!
//! let mut events = service.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let id = service
//!     .submit(NewTask {
//!         chat_id: ChatId(42),
//!         message_id: MessageId(1001),
//!         command_message_id: MessageId(1000),
//!         source: TaskSource::Url("https://example.com/movie.mkv".into()),
//!     })
//!     .await?;
//! println!("queued /cancel_{}", id);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Status-change handler registry
pub mod dispatcher;
/// Download engines
pub mod download;
/// Error types
pub mod error;
/// Subtitle extraction
pub mod extraction;
/// Named periodic jobs
pub mod jobs;
/// Tracing setup with an in-memory log tail
pub mod logging;
/// Terminal-status handlers and the notification seam
pub mod notify;
/// Download, extract, hand off
pub mod processor;
/// Single-worker task queue
pub mod queue;
/// Bounded retry with linear backoff
pub mod retry;
/// Service facade
pub mod service;
/// Aggregate status view
pub mod status;
/// The task entity
pub mod task;
/// Core types and events
pub mod types;
/// Formatting and filesystem helpers
pub mod utils;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use config::Config;
pub use dispatcher::{FnHandler, StatusDispatcher, StatusHandler};
pub use error::{DownloadError, Error, ErrorClass, ExtractionError, Result};
pub use jobs::JobManager;
pub use processor::TaskProcessor;
pub use queue::TaskQueue;
pub use service::SubtitleService;
pub use task::{NewTask, Task, TaskSnapshot, TaskState};
pub use types::{ChatId, Event, MessageId, SubtitleTrack, TaskId, TaskSource, TaskStatus};

/// Run the service until a termination signal arrives, then shut it down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Shutdown stops accepting tasks, stops the periodic jobs, cancels every
/// task and waits for the queue worker.
pub async fn run_with_shutdown(service: SubtitleService) -> Result<()> {
    wait_for_signal().await;
    service.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}

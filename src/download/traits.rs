//! Download engine interface

use crate::types::{DownloadHandle, DownloadStatus};
use async_trait::async_trait;
use std::path::Path;

/// Trait for download engines that fetch a video to local disk
///
/// Implementations wrap an external download daemon. The task processor
/// starts one transfer per task, polls it until it completes or fails, and
/// cancels it on task cancellation or cleanup.
///
/// # Examples
///
/// ```no_run
/// use subtitle_dl::config::Aria2Config;
/// use subtitle_dl::download::{Aria2Engine, DownloadEngine};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = Aria2Engine::new(&Aria2Config::default())?;
/// let handle = engine.start("https://example.com/movie.mkv", Path::new("downloads/abc123")).await?;
/// let status = engine.status(&handle).await?;
/// println!("{}%", status.percent());
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Begin a transfer of `url` into `dir`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] for a malformed URL, and a
    /// transient error if the engine cannot be reached.
    async fn start(&self, url: &str, dir: &Path) -> crate::Result<DownloadHandle>;

    /// Current state of a transfer
    async fn status(&self, handle: &DownloadHandle) -> crate::Result<DownloadStatus>;

    /// Stop a transfer and forget it
    ///
    /// Must be idempotent: canceling an unknown or finished handle succeeds.
    async fn cancel(&self, handle: &DownloadHandle) -> crate::Result<bool>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

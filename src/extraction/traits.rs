//! Subtitle extraction interface

use crate::types::SubtitleTrack;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Trait for pulling subtitle tracks out of a video container
///
/// An empty result means the video has no subtitle tracks; it is not an
/// error at this layer.
#[async_trait]
pub trait SubtitleExtractor: Send + Sync {
    /// Extract every subtitle track of `video` into `output_dir`
    ///
    /// # Errors
    ///
    /// Returns an error if the tool fails outright (unreadable container,
    /// missing binary, timeout), or [`crate::Error::Canceled`] once `cancel`
    /// fires. In-flight tool processes are killed before returning.
    async fn extract(
        &self,
        video: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> crate::Result<Vec<SubtitleTrack>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

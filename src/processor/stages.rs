//! Download and extraction stages

use super::TaskProcessor;
use crate::download::DownloadEngine;
use crate::error::{DownloadError, Error, Result};
use crate::extraction::SubtitleExtractor;
use crate::retry::with_retry;
use crate::task::Task;
use crate::types::SubtitleTrack;
use crate::utils::remove_path_quietly;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Fetch `url` into `staging` and return the downloaded file
///
/// Start and status calls retry transient engine failures. The handle is
/// recorded on the task as soon as it exists so cleanup can abort it.
pub(super) async fn download(
    processor: &TaskProcessor,
    task: &Task,
    url: &str,
    staging: &Path,
    token: &CancellationToken,
) -> Result<PathBuf> {
    let engine: &dyn DownloadEngine = processor.engine.as_ref();
    let task_id = task.id();
    let canceled = || Error::Canceled(format!("download of task {}", task_id));
    tokio::fs::create_dir_all(staging).await?;

    let handle = tokio::select! {
        _ = token.cancelled() => return Err(canceled()),
        handle = with_retry(&processor.retry, "start download", move || engine.start(url, staging)) => handle?,
    };
    task.set_handle(Some(handle.clone()));
    info!(task_id = %task_id, %handle, engine = engine.name(), "Download started");

    let handle_ref = &handle;
    loop {
        let status = tokio::select! {
            _ = token.cancelled() => return Err(canceled()),
            status = with_retry(&processor.retry, "poll download", move || engine.status(handle_ref)) => status?,
        };
        task.update_progress(status.completed_bytes, status.total_bytes, status.speed);

        if status.has_failed {
            let reason = status
                .error_message
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(DownloadError::Failed { reason }.into());
        }

        if status.is_complete {
            let path = status.file_path.ok_or_else(|| DownloadError::MissingFile {
                path: staging.to_path_buf(),
            })?;
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Err(DownloadError::MissingFile { path }.into());
            }
            info!(
                task_id = %task_id,
                path = %path.display(),
                bytes = status.total_bytes,
                "Download complete"
            );
            return Ok(path);
        }

        debug!(
            task_id = %task_id,
            percent = status.percent(),
            speed = status.speed,
            "Download in progress"
        );

        tokio::select! {
            _ = token.cancelled() => return Err(canceled()),
            _ = tokio::time::sleep(processor.poll_interval) => {}
        }
    }
}

/// Validate a local video before extraction
pub(super) async fn check_local_file(path: &Path) -> Result<PathBuf> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(path.to_path_buf()),
        _ => Err(Error::InvalidInput(format!(
            "File not found: {}",
            path.display()
        ))),
    }
}

/// Extract subtitle tracks, then drop the video
///
/// The video is removed once the extractor is done reading it, whatever the
/// outcome. An empty track list is [`Error::NoSubtitles`].
pub(super) async fn extract(
    extractor: &dyn SubtitleExtractor,
    task: &Task,
    video: &Path,
    staging: &Path,
    token: &CancellationToken,
) -> Result<Vec<SubtitleTrack>> {
    tokio::fs::create_dir_all(staging).await?;
    info!(
        task_id = %task.id(),
        video = %video.display(),
        extractor = extractor.name(),
        "Extracting subtitles"
    );

    let result = extractor.extract(video, staging, token).await;

    remove_path_quietly(video).await;
    task.set_local_path(None);

    let tracks = result?;
    if tracks.is_empty() {
        return Err(Error::NoSubtitles);
    }

    for track in &tracks {
        task.insert_metadata(
            format!("track:{}", track.path.display()),
            format!("{}/{}", track.language, track.format),
        );
    }
    task.set_progress(100.0);
    info!(task_id = %task.id(), tracks = tracks.len(), "Extracted subtitles");
    Ok(tracks)
}

//! Shared fixtures for unit tests: task builders and in-memory collaborators

use crate::config::{Config, RetryConfig};
use crate::download::{DownloadEngine, output_file_name};
use crate::error::{DownloadError, Error, Result};
use crate::extraction::SubtitleExtractor;
use crate::notify::NotificationSink;
use crate::status::StatusDisplay;
use crate::task::{NewTask, Task};
use crate::types::{
    ChatId, DownloadHandle, DownloadStatus, Event, MessageId, SubtitleTrack, TaskId, TaskSource,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub(crate) fn url_request(id: &str) -> NewTask {
    NewTask {
        chat_id: ChatId(100),
        message_id: MessageId(200),
        command_message_id: MessageId(201),
        source: TaskSource::Url(format!("https://example.com/videos/{}.mkv", id)),
    }
}

/// WAITING task fetching `https://example.com/videos/<id>.mkv`
pub(crate) fn url_task(id: &str) -> Task {
    Task::new(TaskId::new(id), url_request(id))
}

/// WAITING task for an already uploaded file
pub(crate) fn file_task(id: &str, path: &Path) -> Task {
    Task::new(
        TaskId::new(id),
        NewTask {
            chat_id: ChatId(100),
            message_id: MessageId(200),
            command_message_id: MessageId(201),
            source: TaskSource::File {
                path: path.to_path_buf(),
                file_id: Some(format!("file-{}", id)),
            },
        },
    )
}

/// Configuration with millisecond intervals rooted in `dir`
pub(crate) fn test_config(dir: &Path) -> Config {
    Config {
        download_dir: dir.join("downloads"),
        refresh_interval: Duration::from_millis(20),
        poll_interval: Duration::from_millis(10),
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
        },
        ..Config::default()
    }
}

/// Receive events until one matches, failing the test after five seconds
pub(crate) async fn wait_for_event<F>(rx: &mut broadcast::Receiver<Event>, matches: F) -> Event
where
    F: Fn(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

struct MockDownload {
    path: PathBuf,
    polls: usize,
}

/// Download engine that "downloads" by writing a small file into the target dir
///
/// The file is written when the transfer starts, so an interrupted task
/// leaves a partial download behind exactly like a real engine would.
pub(crate) struct MockEngine {
    start_failures: AtomicUsize,
    polls_to_complete: usize,
    failure: Option<String>,
    starts: AtomicUsize,
    cancels: Mutex<Vec<DownloadHandle>>,
    downloads: Mutex<HashMap<String, MockDownload>>,
}

pub(crate) const MOCK_FILE_SIZE: u64 = 4096;

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self {
            start_failures: AtomicUsize::new(0),
            polls_to_complete: 1,
            failure: None,
            starts: AtomicUsize::new(0),
            cancels: Mutex::new(Vec::new()),
            downloads: Mutex::new(HashMap::new()),
        }
    }

    /// Fail the first `n` start calls with a transient error
    pub(crate) fn with_start_failures(self, n: usize) -> Self {
        self.start_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Report progress forever
    pub(crate) fn never_completing(mut self) -> Self {
        self.polls_to_complete = usize::MAX;
        self
    }

    /// Report the transfer as failed on the first poll
    pub(crate) fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    /// Number of successful and failed start calls
    pub(crate) fn start_calls(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn canceled(&self) -> Vec<DownloadHandle> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl DownloadEngine for MockEngine {
    async fn start(&self, url: &str, dir: &Path) -> Result<DownloadHandle> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        if self
            .start_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Transient("engine unreachable".into()));
        }

        let path = dir.join(output_file_name(url));
        tokio::fs::write(&path, vec![0u8; MOCK_FILE_SIZE as usize]).await?;

        let handle = format!("gid{}", n);
        self.downloads
            .lock()
            .unwrap()
            .insert(handle.clone(), MockDownload { path, polls: 0 });
        Ok(DownloadHandle(handle))
    }

    async fn status(&self, handle: &DownloadHandle) -> Result<DownloadStatus> {
        let mut downloads = self.downloads.lock().unwrap();
        let Some(download) = downloads.get_mut(&handle.0) else {
            return Err(DownloadError::HandleNotFound {
                handle: handle.0.clone(),
            }
            .into());
        };
        download.polls += 1;

        if let Some(reason) = &self.failure {
            return Ok(DownloadStatus {
                has_failed: true,
                error_message: Some(reason.clone()),
                ..Default::default()
            });
        }

        let complete = download.polls > self.polls_to_complete;
        Ok(DownloadStatus {
            is_complete: complete,
            completed_bytes: if complete {
                MOCK_FILE_SIZE
            } else {
                MOCK_FILE_SIZE / 2
            },
            total_bytes: MOCK_FILE_SIZE,
            speed: 1024,
            file_path: complete.then(|| download.path.clone()),
            ..Default::default()
        })
    }

    async fn cancel(&self, handle: &DownloadHandle) -> Result<bool> {
        self.cancels.lock().unwrap().push(handle.clone());
        self.downloads.lock().unwrap().remove(&handle.0);
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Extractor that writes one `.srt` file per configured language
pub(crate) struct MockExtractor {
    languages: Vec<&'static str>,
    failure: Option<String>,
    block_until_canceled: bool,
    calls: AtomicUsize,
    saw_video: AtomicBool,
}

impl MockExtractor {
    pub(crate) fn with_languages(languages: &[&'static str]) -> Self {
        Self {
            languages: languages.to_vec(),
            failure: None,
            block_until_canceled: false,
            calls: AtomicUsize::new(0),
            saw_video: AtomicBool::new(false),
        }
    }

    /// A video without subtitle tracks
    pub(crate) fn empty() -> Self {
        Self::with_languages(&[])
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::empty()
        }
    }

    /// Write a partial track, then wait for cancellation
    pub(crate) fn blocking() -> Self {
        Self {
            block_until_canceled: true,
            ..Self::with_languages(&["eng"])
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether the video existed when extraction began
    pub(crate) fn saw_video(&self) -> bool {
        self.saw_video.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubtitleExtractor for MockExtractor {
    async fn extract(
        &self,
        video: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubtitleTrack>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.saw_video
            .store(tokio::fs::try_exists(video).await.unwrap_or(false), Ordering::SeqCst);

        if self.block_until_canceled {
            tokio::fs::write(output_dir.join("partial.srt"), b"1\n").await?;
            cancel.cancelled().await;
            return Err(Error::Canceled("mock extraction".into()));
        }
        if let Some(reason) = &self.failure {
            return Err(Error::ExternalTool(reason.clone()));
        }

        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut tracks = Vec::new();
        for (i, language) in self.languages.iter().enumerate() {
            let path = output_dir.join(format!("{}_{}_{}.srt", stem, language, i + 2));
            tokio::fs::write(&path, b"1\n00:00:01,000 --> 00:00:02,000\nHello\n").await?;
            tracks.push(SubtitleTrack {
                language: language.to_string(),
                format: "srt".into(),
                path,
            });
        }
        Ok(tracks)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// A message delivered through [`RecordingSink`]
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum SentMessage {
    Files {
        chat_id: ChatId,
        reply_to: MessageId,
        paths: Vec<PathBuf>,
    },
    Error {
        chat_id: ChatId,
        reply_to: MessageId,
        message: String,
    },
}

/// Notification sink that records what it was asked to send
pub(crate) struct RecordingSink {
    transient_failures: AtomicUsize,
    fail_uploads: bool,
    attempts: AtomicUsize,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self {
            transient_failures: AtomicUsize::new(0),
            fail_uploads: false,
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `n` sends with a transient error
    pub(crate) fn failing(n: usize) -> Self {
        let sink = Self::new();
        sink.transient_failures.store(n, Ordering::SeqCst);
        sink
    }

    /// Reject every file upload permanently
    pub(crate) fn with_failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    fn begin_attempt(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.transient_failures.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |left| left.checked_sub(1),
        ) {
            Ok(_) => Err(Error::Transient("chat API timed out".into())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send_files(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        paths: &[PathBuf],
    ) -> Result<()> {
        self.begin_attempt()?;
        if self.fail_uploads {
            return Err(Error::Notification("file too large".into()));
        }
        self.sent.lock().unwrap().push(SentMessage::Files {
            chat_id,
            reply_to,
            paths: paths.to_vec(),
        });
        Ok(())
    }

    async fn send_error(&self, chat_id: ChatId, reply_to: MessageId, message: &str) -> Result<()> {
        self.begin_attempt()?;
        self.sent.lock().unwrap().push(SentMessage::Error {
            chat_id,
            reply_to,
            message: message.to_string(),
        });
        Ok(())
    }
}

/// Status display that keeps every shown text
#[derive(Default)]
pub(crate) struct RecordingDisplay {
    shown: Mutex<Vec<String>>,
    clears: AtomicUsize,
}

impl RecordingDisplay {
    pub(crate) fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }

    pub(crate) fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusDisplay for RecordingDisplay {
    async fn show(&self, text: &str) -> Result<()> {
        self.shown.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

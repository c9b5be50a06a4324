//! In-memory collaborators implementing the public seams

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use subtitle_dl::download::{DownloadEngine, output_file_name};
use subtitle_dl::extraction::SubtitleExtractor;
use subtitle_dl::notify::NotificationSink;
use subtitle_dl::status::StatusDisplay;
use subtitle_dl::types::{DownloadHandle, DownloadStatus};
use subtitle_dl::{ChatId, Error, MessageId, Result, SubtitleTrack};
use tokio_util::sync::CancellationToken;

/// Size of every fake video
pub const VIDEO_SIZE: u64 = 8192;

struct Transfer {
    path: PathBuf,
    polls: usize,
}

/// Download engine that writes a small file and finishes after a few polls
///
/// `hold` keeps every transfer in flight until [`FakeEngine::release`] is called.
pub struct FakeEngine {
    transfers: Mutex<HashMap<String, Transfer>>,
    next: AtomicUsize,
    start_calls: AtomicUsize,
    start_failures: AtomicUsize,
    held: AtomicBool,
    polls_to_complete: usize,
    slow_first_cancel: Mutex<Option<Duration>>,
    cancels_done: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            transfers: Mutex::new(HashMap::new()),
            next: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            start_failures: AtomicUsize::new(0),
            held: AtomicBool::new(false),
            polls_to_complete: 2,
            slow_first_cancel: Mutex::new(None),
            cancels_done: AtomicUsize::new(0),
        }
    }

    pub fn held() -> Self {
        let engine = Self::new();
        engine.held.store(true, Ordering::SeqCst);
        engine
    }

    /// Fail the first `n` starts with a transient error
    pub fn flaky(n: usize) -> Self {
        let engine = Self::new();
        engine.start_failures.store(n, Ordering::SeqCst);
        engine
    }

    /// Held transfers whose first abort takes `delay` to reach the engine
    pub fn held_with_slow_cancel(delay: Duration) -> Self {
        let engine = Self::held();
        *engine.slow_first_cancel.lock().unwrap() = Some(delay);
        engine
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    /// Cancel calls that ran to completion
    pub fn cancels_done(&self) -> usize {
        self.cancels_done.load(Ordering::SeqCst)
    }

    pub fn live_transfers(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }
}

#[async_trait]
impl DownloadEngine for FakeEngine {
    async fn start(&self, url: &str, dir: &Path) -> Result<DownloadHandle> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.start_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.start_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Transient("engine busy".into()));
        }

        let path = dir.join(output_file_name(url));
        tokio::fs::write(&path, vec![0u8; VIDEO_SIZE as usize]).await?;
        let gid = format!("fake{}", self.next.fetch_add(1, Ordering::SeqCst));
        self.transfers
            .lock()
            .unwrap()
            .insert(gid.clone(), Transfer { path, polls: 0 });
        Ok(DownloadHandle(gid))
    }

    async fn status(&self, handle: &DownloadHandle) -> Result<DownloadStatus> {
        let held = self.held.load(Ordering::SeqCst);
        let mut transfers = self.transfers.lock().unwrap();
        let Some(transfer) = transfers.get_mut(&handle.0) else {
            return Ok(DownloadStatus {
                has_failed: true,
                error_message: Some("transfer removed".into()),
                ..Default::default()
            });
        };
        transfer.polls += 1;

        let done = !held && transfer.polls >= self.polls_to_complete;
        Ok(DownloadStatus {
            is_complete: done,
            completed_bytes: if done { VIDEO_SIZE } else { VIDEO_SIZE / 4 },
            total_bytes: VIDEO_SIZE,
            speed: if done { 0 } else { 2048 },
            file_path: Some(transfer.path.clone()),
            ..Default::default()
        })
    }

    async fn cancel(&self, handle: &DownloadHandle) -> Result<bool> {
        let delay = self.slow_first_cancel.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let removed = self.transfers.lock().unwrap().remove(&handle.0).is_some();
        self.cancels_done.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Extractor that writes one `.srt` per configured language
pub struct FakeExtractor {
    languages: Vec<String>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn with_languages(languages: &[&str]) -> Self {
        Self {
            languages: languages.iter().map(|l| l.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    /// A container without subtitle tracks
    pub fn without_subtitles() -> Self {
        Self::with_languages(&[])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubtitleExtractor for FakeExtractor {
    async fn extract(
        &self,
        video: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<SubtitleTrack>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(Error::Canceled("extraction".into()));
        }

        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".into());
        let mut tracks = Vec::new();
        for language in &self.languages {
            let path = output_dir.join(format!("{}.{}.srt", stem, language));
            tokio::fs::write(&path, "1\n00:00:01,000 --> 00:00:02,000\nHello\n").await?;
            tracks.push(SubtitleTrack {
                language: language.clone(),
                format: "srt".into(),
                path,
            });
        }
        Ok(tracks)
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// One delivered upload; `all_existed` records whether every file was on disk at send time
#[derive(Clone, Debug)]
pub struct Delivery {
    pub chat_id: ChatId,
    pub reply_to: MessageId,
    pub files: Vec<PathBuf>,
    pub all_existed: bool,
}

/// Sink that keeps everything it was asked to send
#[derive(Default)]
pub struct MemorySink {
    deliveries: Mutex<Vec<Delivery>>,
    errors: Mutex<Vec<String>>,
    transient_failures: AtomicUsize,
}

impl MemorySink {
    /// Fail the first `n` sends with a transient error
    pub fn flaky(n: usize) -> Self {
        let sink = Self::default();
        sink.transient_failures.store(n, Ordering::SeqCst);
        sink
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    fn take_failure(&self) -> Result<()> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Transient("rate limited".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn send_files(&self, chat_id: ChatId, reply_to: MessageId, paths: &[PathBuf]) -> Result<()> {
        self.take_failure()?;
        self.deliveries.lock().unwrap().push(Delivery {
            chat_id,
            reply_to,
            files: paths.to_vec(),
            all_existed: paths.iter().all(|p| p.exists()),
        });
        Ok(())
    }

    async fn send_error(&self, _chat_id: ChatId, _reply_to: MessageId, message: &str) -> Result<()> {
        self.take_failure()?;
        self.errors.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Display that records what it was told to show
#[derive(Default)]
pub struct MemoryDisplay {
    shown: Mutex<Vec<String>>,
    clears: AtomicUsize,
}

impl MemoryDisplay {
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusDisplay for MemoryDisplay {
    async fn show(&self, text: &str) -> Result<()> {
        self.shown.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

//! Common test utilities for subtitle-dl integration tests

#[allow(dead_code)]
pub mod assertions;
#[allow(dead_code)]
pub mod fakes;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fakes::*;

use std::sync::Arc;
use std::time::Duration;
use subtitle_dl::config::RetryConfig;
use subtitle_dl::{ChatId, Config, MessageId, NewTask, SubtitleService, TaskSource};
use tempfile::TempDir;

/// A service wired to in-memory collaborators
pub struct Harness {
    pub service: SubtitleService,
    pub engine: Arc<FakeEngine>,
    pub extractor: Arc<FakeExtractor>,
    pub sink: Arc<MemorySink>,
    pub dir: TempDir,
}

/// Fast timings so lifecycle tests finish in milliseconds
pub fn fast_config(dir: &TempDir) -> Config {
    Config {
        download_dir: dir.path().join("downloads"),
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

pub async fn harness(engine: FakeEngine, extractor: FakeExtractor) -> Harness {
    harness_with_sink(engine, extractor, MemorySink::default()).await
}

pub async fn harness_with_sink(
    engine: FakeEngine,
    extractor: FakeExtractor,
    sink: MemorySink,
) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let engine = Arc::new(engine);
    let extractor = Arc::new(extractor);
    let sink = Arc::new(sink);
    let service = SubtitleService::new(
        fast_config(&dir),
        engine.clone(),
        extractor.clone(),
        sink.clone(),
    )
    .await
    .expect("service should start");

    Harness {
        service,
        engine,
        extractor,
        sink,
        dir,
    }
}

/// A URL request for `https://videos.example.org/{name}.mkv`
pub fn url_request(name: &str) -> NewTask {
    NewTask {
        chat_id: ChatId(7),
        message_id: MessageId(500),
        command_message_id: MessageId(499),
        source: TaskSource::Url(format!("https://videos.example.org/{}.mkv", name)),
    }
}

//! Waiting helpers for lifecycle tests

use std::path::Path;
use std::time::Duration;
use subtitle_dl::{Event, SubtitleService, TaskId, TaskStatus};
use tokio::sync::broadcast;

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Wait for the first event matching `pred`, panicking on timeout
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait until the task leaves tracking
pub async fn wait_for_removal(rx: &mut broadcast::Receiver<Event>, id: &TaskId) {
    wait_for_event(rx, |e| matches!(e, Event::Removed { id: removed } if removed == id)).await;
}

/// Poll the service until `id` reports `status`
pub async fn wait_for_status(service: &SubtitleService, id: &TaskId, status: TaskStatus) {
    tokio::time::timeout(WAIT, async {
        loop {
            if service.task(id).await.map(|t| t.state.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("task {} never reached {}", id, status));
}

/// Every regular file below `dir`, recursively
pub fn files_below(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            out.extend(files_below(&path));
        } else {
            out.push(path);
        }
    }
    out
}

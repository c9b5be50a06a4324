//! Aggregate status view
//!
//! [`render_status`] turns task snapshots into the plain-text progress view
//! shown in the chat. [`StatusBoard`] is the periodic job that keeps that view
//! fresh and removes it once nothing is left to show.

use crate::error::Result;
use crate::jobs::JobManager;
use crate::queue::TaskQueue;
use crate::task::TaskSnapshot;
use crate::types::TaskStatus;
use crate::utils::{PROGRESS_BAR_WIDTH, format_duration, format_eta, format_size, progress_bar};
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Where the rendered view is shown (a pinned chat message, a terminal, ...)
#[async_trait]
pub trait StatusDisplay: Send + Sync {
    /// Replace the displayed text
    async fn show(&self, text: &str) -> Result<()>;

    /// Remove the display
    async fn clear(&self) -> Result<()>;
}

/// Aggregate transfer speeds across tasks, in bytes per second
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusTotals {
    pub download_speed: u64,
    pub upload_speed: u64,
}

impl StatusTotals {
    pub fn from_tasks(tasks: &[TaskSnapshot]) -> Self {
        tasks.iter().fold(Self::default(), |mut totals, t| {
            match t.state.status {
                TaskStatus::Downloading => totals.download_speed += t.state.speed,
                TaskStatus::Uploading => totals.upload_speed += t.state.speed,
                _ => {}
            }
            totals
        })
    }
}

/// Number of pages needed for `count` tasks, at least one
pub fn page_count(count: usize, page_size: usize) -> usize {
    count.div_ceil(page_size.max(1)).max(1)
}

/// Render one page (0-based, clamped) of the status view
pub fn render_status(
    tasks: &[TaskSnapshot],
    page: usize,
    page_size: usize,
    totals: &StatusTotals,
) -> String {
    let page_size = page_size.max(1);
    let pages = page_count(tasks.len(), page_size);
    let page = page.min(pages - 1);

    let mut out = String::new();
    for (index, task) in tasks
        .iter()
        .enumerate()
        .skip(page * page_size)
        .take(page_size)
    {
        render_task(&mut out, index + 1, task);
        out.push('\n');
    }

    if pages > 1 {
        let _ = writeln!(out, "Page {}/{}", page + 1, pages);
    }
    let _ = write!(
        out,
        "DL: {}/s | UL: {}/s",
        format_size(totals.download_speed),
        format_size(totals.upload_speed)
    );
    out
}

fn render_task(out: &mut String, position: usize, task: &TaskSnapshot) {
    let state = &task.state;
    let _ = writeln!(out, "{}. {}", position, task.display_name);
    let _ = writeln!(
        out,
        "{} {:.1}%",
        progress_bar(state.progress, PROGRESS_BAR_WIDTH),
        state.progress
    );
    let _ = writeln!(out, "Status: {}", state.status.title());

    if state.total_bytes > 0 {
        let _ = writeln!(
            out,
            "Downloaded: {} of {}",
            format_size(state.downloaded_bytes),
            format_size(state.total_bytes)
        );
    }
    if matches!(state.status, TaskStatus::Downloading | TaskStatus::Uploading) {
        let _ = writeln!(
            out,
            "Speed: {}/s | ETA: {}",
            format_size(state.speed),
            format_eta(state.downloaded_bytes, state.total_bytes, state.speed)
        );
    }
    let _ = writeln!(out, "Elapsed: {}", format_duration(task.elapsed));
    let _ = writeln!(out, "/cancel_{}", task.id);
}

/// Periodic job body that refreshes a [`StatusDisplay`]
pub struct StatusBoard {
    queue: TaskQueue,
    display: Arc<dyn StatusDisplay>,
    jobs: JobManager,
    job_id: String,
    page_size: usize,
    page: AtomicUsize,
    last_text: Mutex<Option<String>>,
}

impl StatusBoard {
    pub fn new(
        queue: TaskQueue,
        display: Arc<dyn StatusDisplay>,
        jobs: JobManager,
        job_id: impl Into<String>,
        page_size: usize,
    ) -> Self {
        Self {
            queue,
            display,
            jobs,
            job_id: job_id.into(),
            page_size: page_size.max(1),
            page: AtomicUsize::new(0),
            last_text: Mutex::new(None),
        }
    }

    /// Select the page shown on the next refresh (0-based)
    pub fn set_page(&self, page: usize) {
        self.page.store(page, Ordering::Relaxed);
    }

    pub fn page(&self) -> usize {
        self.page.load(Ordering::Relaxed)
    }

    /// Render and push the current view
    ///
    /// With no active tasks left, the display is cleared and the board's own
    /// job is stopped.
    pub async fn refresh(&self) -> Result<()> {
        let tasks: Vec<TaskSnapshot> = self
            .queue
            .get_all_tasks()
            .await
            .into_iter()
            .filter(|t| !t.state.status.is_terminal())
            .collect();

        if tasks.is_empty() {
            tracing::debug!(job = %self.job_id, "No active tasks, removing status display");
            self.jobs.stop_job(&self.job_id).await;
            *self.last_text.lock().await = None;
            self.page.store(0, Ordering::Relaxed);
            return self.display.clear().await;
        }

        let pages = page_count(tasks.len(), self.page_size);
        let page = self.page().min(pages - 1);
        self.page.store(page, Ordering::Relaxed);

        let text = render_status(
            &tasks,
            page,
            self.page_size,
            &StatusTotals::from_tasks(&tasks),
        );

        let mut last = self.last_text.lock().await;
        if last.as_deref() == Some(text.as_str()) {
            return Ok(());
        }
        self.display.show(&text).await?;
        *last = Some(text);
        Ok(())
    }
}

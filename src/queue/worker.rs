//! Queue worker loop

use super::{CANCEL_GRACE, TaskQueue};
use crate::dispatcher::panic_message;
use crate::error::ErrorClass;
use crate::task::Task;
use crate::types::{Event, TaskStatus};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

impl TaskQueue {
    /// Process tasks one at a time until the FIFO is empty
    pub(super) async fn run_worker(self) {
        loop {
            let task = {
                let mut state = self.state.lock().await;
                if state.active.is_some() {
                    None
                } else if let Some(task) = state.fifo.pop_front() {
                    state.active = Some(task.clone());
                    Some(task)
                } else {
                    state.worker_running = false;
                    tracing::debug!("Queue drained, worker exiting");
                    return;
                }
            };

            let Some(task) = task else {
                // Single flight: another task is still being finished
                tokio::time::sleep(self.poll_interval).await;
                continue;
            };

            self.process(&task).await;
            self.finish(&task).await;
        }
    }

    /// Hand the task to its WAITING handlers and wait for a terminal status
    async fn process(&self, task: &Arc<Task>) {
        let task_id = task.id().clone();
        task.mark_started();
        tracing::info!(task_id = %task_id, name = %task.display_name(), "Processing task");

        // Canceled before the worker got to it
        if task.is_terminal() {
            return;
        }

        let work = AssertUnwindSafe(async {
            if let Err(e) = self.dispatcher.notify(task).await {
                if !task.is_terminal() {
                    task.fail(&e);
                }
            }
            task.wait_terminal().await
        })
        .catch_unwind();
        tokio::pin!(work);

        let token = task.cancel_token().clone();
        let outcome = tokio::select! {
            outcome = &mut work => Some(outcome),
            _ = token.cancelled() => {
                // Let the handlers unwind and clean up before moving on
                tokio::time::timeout(CANCEL_GRACE, &mut work).await.ok()
            }
        };

        match outcome {
            Some(Ok(status)) => {
                tracing::info!(task_id = %task_id, %status, "Task finished");
            }
            Some(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(task_id = %task_id, panic = %message, "Task processing panicked");
                task.fail_with(
                    format!("Internal error: {}", message),
                    ErrorClass::Unexpected,
                );
            }
            None => {
                tracing::warn!(
                    task_id = %task_id,
                    grace_secs = CANCEL_GRACE.as_secs(),
                    "Canceled task did not unwind in time"
                );
            }
        }

        if !task.is_terminal() {
            task.fail_with("Processing stopped unexpectedly", ErrorClass::Unexpected);
        }
    }

    /// Run terminal handlers, then untrack the task
    async fn finish(&self, task: &Arc<Task>) {
        debug_assert!(task.status().is_terminal());
        if let Err(e) = self.dispatcher.notify(task).await {
            tracing::warn!(
                task_id = %task.id(),
                status = %task.status(),
                error = %e,
                "Terminal status handlers failed"
            );
        }

        {
            let mut state = self.state.lock().await;
            state.tasks.remove(task.id());
            if state.active.as_ref().is_some_and(|a| a.id() == task.id()) {
                state.active = None;
            }
        }
        self.dispatcher.release(task.id()).await;
        self.event_tx
            .send(Event::Removed {
                id: task.id().clone(),
            })
            .ok();

        if task.status() == TaskStatus::Error {
            let error = task.with_state(|s| s.error_message.clone()).unwrap_or_default();
            tracing::warn!(task_id = %task.id(), error = %error, "Task removed after failure");
        } else {
            tracing::info!(task_id = %task.id(), status = %task.status(), "Task removed from queue");
        }
    }
}

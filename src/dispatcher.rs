//! Status-change dispatch
//!
//! A fixed table indexed by [`TaskStatus`], each slot holding handlers in
//! registration order. Handlers are registered while the dispatcher is still
//! exclusively owned (before it is shared behind an `Arc`), so dispatch never
//! races with registration.

use crate::error::{Error, Result};
use crate::task::Task;
use crate::types::{TaskId, TaskStatus};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Attempts to take a task's transition lock before giving up
const LOCK_ATTEMPTS: u32 = 3;
/// Wait between lock attempts
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Reacts to a task entering a status
///
/// The task carries its own chat context (chat and message ids), so handlers
/// never need to look up request state elsewhere. A handler that hits an
/// unrecoverable failure should mark the task ERROR before returning.
#[async_trait]
pub trait StatusHandler: Send + Sync {
    async fn handle(&self, task: &Arc<Task>) -> Result<()>;

    /// Name used in log lines
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

type HandlerFn = dyn Fn(Arc<Task>) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Adapter turning an async closure into a [`StatusHandler`]
pub struct FnHandler {
    name: String,
    f: Box<HandlerFn>,
}

impl FnHandler {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<Task>) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl StatusHandler for FnHandler {
    async fn handle(&self, task: &Arc<Task>) -> Result<()> {
        (self.f)(task.clone()).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Per-task record of the last dispatched status
///
/// A task's slot stays locked while its handlers run, so a concurrent
/// notification for the same task waits a bounded time and is then skipped.
/// Entries are created on first dispatch and dropped by
/// [`StatusDispatcher::release`] when the queue stops tracking the task.
#[derive(Default)]
struct TransitionLocks {
    slots: Mutex<HashMap<TaskId, Arc<Mutex<Option<TaskStatus>>>>>,
}

impl TransitionLocks {
    /// Claim dispatch of `status` for `id`
    ///
    /// The returned guard must be held until the handlers are done. Returns
    /// `None` if `status` was already dispatched for this task or the lock
    /// stayed busy for every attempt.
    async fn claim(
        &self,
        id: &TaskId,
        status: TaskStatus,
    ) -> Option<OwnedMutexGuard<Option<TaskStatus>>> {
        let slot = self.slots.lock().await.entry(id.clone()).or_default().clone();

        for attempt in 1..=LOCK_ATTEMPTS {
            if let Ok(mut last) = slot.clone().try_lock_owned() {
                if *last == Some(status) {
                    return None;
                }
                *last = Some(status);
                return Some(last);
            }
            if attempt < LOCK_ATTEMPTS {
                tokio::time::sleep(LOCK_RETRY_DELAY).await;
            }
        }

        tracing::warn!(task_id = %id, %status, "Transition lock busy, skipping dispatch");
        None
    }

    async fn release(&self, id: &TaskId) {
        self.slots.lock().await.remove(id);
    }

    async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

/// Registry mapping each status to its ordered handlers
pub struct StatusDispatcher {
    handlers: [Vec<Arc<dyn StatusHandler>>; TaskStatus::COUNT],
    locks: TransitionLocks,
}

impl Default for StatusDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: std::array::from_fn(|_| Vec::new()),
            locks: TransitionLocks::default(),
        }
    }

    /// Append a handler for `status`. Insertion order is invocation order.
    pub fn register(&mut self, status: TaskStatus, handler: Arc<dyn StatusHandler>) {
        tracing::debug!(%status, handler = handler.name(), "Registered status handler");
        self.handlers[status.index()].push(handler);
    }

    /// Register one handler for several statuses
    pub fn register_many(&mut self, statuses: &[TaskStatus], handler: Arc<dyn StatusHandler>) {
        for status in statuses {
            self.register(*status, handler.clone());
        }
    }

    pub fn handler_count(&self, status: TaskStatus) -> usize {
        self.handlers[status.index()].len()
    }

    /// Run every handler registered for the task's current status
    ///
    /// Handlers run one after another. A failing or panicking handler is
    /// logged and the rest still run; the first failure is returned once all
    /// handlers are done. A repeated notification for a status that was
    /// already dispatched for this task is skipped.
    pub async fn notify(&self, task: &Arc<Task>) -> Result<()> {
        let status = task.status();
        // Released on every exit, including a panic or a dropped future
        let Some(_guard) = self.locks.claim(task.id(), status).await else {
            tracing::debug!(task_id = %task.id(), %status, "Duplicate status notification skipped");
            return Ok(());
        };

        let mut first_error = None;
        for handler in &self.handlers[status.index()] {
            let outcome = AssertUnwindSafe(handler.handle(task)).catch_unwind().await;
            let result = match outcome {
                Ok(result) => result,
                Err(panic) => Err(Error::Other(format!(
                    "handler {} panicked: {}",
                    handler.name(),
                    panic_message(panic.as_ref())
                ))),
            };

            if let Err(e) = result {
                tracing::error!(
                    task_id = %task.id(),
                    %status,
                    handler = handler.name(),
                    error = %e,
                    "Status handler failed"
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Forget dispatch history for a task that is no longer tracked
    pub async fn release(&self, id: &TaskId) {
        self.locks.release(id).await;
    }

    /// Number of tasks with dispatch history
    pub async fn tracked_tasks(&self) -> usize {
        self.locks.len().await
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

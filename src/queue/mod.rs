//! Single-worker task queue
//!
//! Tasks wait in FIFO order and one background worker processes them one
//! at a time. The worker does not know how a task is processed: it notifies
//! the [`StatusDispatcher`] and waits for the task to reach a terminal
//! status, so the processor is linked in only through handler registration.
//!
//! The worker exits when the FIFO drains and is started again lazily by
//! the next [`TaskQueue::add_task`].

mod worker;


use crate::dispatcher::StatusDispatcher;
use crate::error::{Error, Result};
use crate::task::{Task, TaskSnapshot};
use crate::types::{Event, TaskId, TaskSource, TaskStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

/// How long a canceled task's handlers get to finish their own cleanup
const CANCEL_GRACE: Duration = Duration::from_secs(5);

struct Tracked {
    seq: u64,
    task: Arc<Task>,
}

#[derive(Default)]
struct QueueState {
    fifo: VecDeque<Arc<Task>>,
    tasks: HashMap<TaskId, Tracked>,
    next_seq: u64,
    active: Option<Arc<Task>>,
    worker: Option<JoinHandle<()>>,
    worker_running: bool,
}

/// FIFO admission queue with a single processing worker
#[derive(Clone)]
pub struct TaskQueue {
    state: Arc<Mutex<QueueState>>,
    dispatcher: Arc<StatusDispatcher>,
    event_tx: broadcast::Sender<Event>,
    poll_interval: Duration,
    accepting: Arc<AtomicBool>,
}

impl TaskQueue {
    /// Create a queue that dispatches status changes through `dispatcher`
    ///
    /// `poll_interval` is how long the worker backs off when it finds a task
    /// already active.
    pub fn new(
        dispatcher: Arc<StatusDispatcher>,
        event_tx: broadcast::Sender<Event>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            dispatcher,
            event_tx,
            poll_interval,
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Enqueue a WAITING task and make sure the worker is running
    ///
    /// # Errors
    ///
    /// - [`Error::Duplicate`] if a task with the same id is already tracked
    /// - [`Error::ShuttingDown`] after [`TaskQueue::shutdown`]
    /// - [`Error::InvalidTransition`] if the task is not WAITING
    pub async fn add_task(&self, task: Task) -> Result<()> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if task.status() != TaskStatus::Waiting {
            return Err(Error::InvalidTransition {
                id: task.id().to_string(),
                from: task.status(),
                to: TaskStatus::Waiting,
            });
        }

        let task = Arc::new(task);
        task.attach_events(self.event_tx.clone());

        let mut state = self.state.lock().await;
        if state.tasks.contains_key(task.id()) {
            return Err(Error::Duplicate(task.id().to_string()));
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        state.tasks.insert(
            task.id().clone(),
            Tracked {
                seq,
                task: task.clone(),
            },
        );
        state.fifo.push_back(task.clone());

        tracing::info!(
            task_id = %task.id(),
            name = %task.display_name(),
            queue_size = state.fifo.len(),
            "Added task to queue"
        );
        self.event_tx
            .send(Event::Queued {
                id: task.id().clone(),
                name: task.display_name(),
            })
            .ok();

        self.ensure_worker(&mut state);
        Ok(())
    }

    fn ensure_worker(&self, state: &mut QueueState) {
        let alive = state.worker_running
            && state
                .worker
                .as_ref()
                .is_some_and(|handle| !handle.is_finished());
        if alive {
            return;
        }

        if state.worker_running {
            // The previous worker died without clearing its flags
            tracing::warn!("Queue worker exited unexpectedly, restarting");
            state.active = None;
        }

        state.worker_running = true;
        let queue = self.clone();
        state.worker = Some(tokio::spawn(async move { queue.run_worker().await }));
        tracing::debug!("Queue worker started");
    }

    /// Snapshot of one tracked task
    pub async fn get_task(&self, id: &TaskId) -> Option<TaskSnapshot> {
        let state = self.state.lock().await;
        state.tasks.get(id).map(|t| t.task.snapshot())
    }

    /// Snapshots of every tracked task in insertion order
    pub async fn get_all_tasks(&self) -> Vec<TaskSnapshot> {
        let state = self.state.lock().await;
        let mut tracked: Vec<&Tracked> = state.tasks.values().collect();
        tracked.sort_by_key(|t| t.seq);
        tracked.into_iter().map(|t| t.task.snapshot()).collect()
    }

    /// Number of tracked tasks (active plus queued)
    pub async fn len(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Id of the task the worker is processing, if any
    pub async fn active_task_id(&self) -> Option<TaskId> {
        let state = self.state.lock().await;
        state.active.as_ref().map(|t| t.id().clone())
    }

    /// A non-terminal tracked task with the same input as `source`
    pub async fn find_duplicate(&self, source: &TaskSource) -> Option<TaskId> {
        let state = self.state.lock().await;
        let mut matches: Vec<&Tracked> = state
            .tasks
            .values()
            .filter(|t| !t.task.is_terminal() && t.task.source().same_input(source))
            .collect();
        matches.sort_by_key(|t| t.seq);
        matches.first().map(|t| t.task.id().clone())
    }

    /// Cancel one task
    ///
    /// A queued task is removed right away and its CANCELED handlers run
    /// without any processing having started. The active task is marked
    /// CANCELED and its token triggered; the worker then runs the CANCELED
    /// handlers once processing has unwound.
    ///
    /// Returns false if the id is unknown.
    pub async fn cancel_task(&self, id: &TaskId) -> bool {
        let (task, was_queued) = {
            let mut state = self.state.lock().await;
            let Some(task) = state.tasks.get(id).map(|t| t.task.clone()) else {
                return false;
            };
            let is_active = state.active.as_ref().is_some_and(|a| a.id() == id);
            if !is_active {
                state.fifo.retain(|t| t.id() != id);
                state.tasks.remove(id);
            }
            (task, !is_active)
        };

        let changed = task.cancel();
        tracing::info!(task_id = %id, queued = was_queued, changed, "Canceled task");

        if was_queued {
            self.finish_unstarted(&task).await;
        }
        true
    }

    /// Cancel the active task, then every queued task in FIFO order
    ///
    /// Returns the number of tasks whose status changed to CANCELED. Every
    /// task is untracked when this returns.
    pub async fn cancel_all_tasks(&self) -> usize {
        let (active, queued) = {
            let mut state = self.state.lock().await;
            let active = state.active.clone();
            let queued: Vec<Arc<Task>> = state.fifo.drain(..).collect();
            for task in active.iter().chain(queued.iter()) {
                state.tasks.remove(task.id());
            }
            (active, queued)
        };

        let mut count = 0;
        if let Some(task) = active {
            // A task that already reached a terminal status is left to the worker
            if task.cancel() {
                count += 1;
            }
        }
        for task in queued {
            if task.cancel() {
                count += 1;
            }
            self.finish_unstarted(&task).await;
        }

        tracing::info!(count, "Canceled all tasks");
        count
    }

    /// Notify handlers for a task that never reached the worker and forget it
    async fn finish_unstarted(&self, task: &Arc<Task>) {
        if let Err(e) = self.dispatcher.notify(task).await {
            tracing::warn!(task_id = %task.id(), error = %e, "Cancellation handlers failed");
        }
        self.dispatcher.release(task.id()).await;
        self.event_tx
            .send(Event::Removed {
                id: task.id().clone(),
            })
            .ok();
    }

    /// Stop accepting tasks, cancel everything and wait for the worker
    pub async fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let canceled = self.cancel_all_tasks().await;

        let worker = self.state.lock().await.worker.take();
        if let Some(handle) = worker {
            match tokio::time::timeout(CANCEL_GRACE * 2, handle).await {
                Ok(_) => tracing::info!(canceled, "Task queue shut down"),
                Err(_) => tracing::warn!("Queue worker did not stop in time"),
            }
        }
    }

    /// Whether new tasks are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

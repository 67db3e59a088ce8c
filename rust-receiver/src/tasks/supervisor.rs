//! Supervisor for deferred background tasks.
//!
//! Every task spawned through [`TaskSupervisor::spawn`] is registered in an
//! explicit task set before it starts running, and removed by a drop guard
//! when it reaches a terminal state. The guard runs on success, error,
//! cancellation, panic, and when the future is dropped without completing,
//! so no path leaves a stale entry behind.
//!
//! Shutdown is cooperative: [`TaskSupervisor::drain`] raises a
//! supervisor-wide cancellation flag that tasks observe at their suspension
//! points, then waits for the set to empty.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::error::{DrainError, TaskError};

/// Identifier of a spawned task, unique per supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a background task.
///
/// `Spawned → Running → {Completed, Failed, Cancelled}`. Terminal states are
/// final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Registered, not yet polled.
    Spawned,
    /// Polled at least once.
    Running,
    /// Work returned `Ok`.
    Completed,
    /// Work returned an error other than cancellation, or panicked.
    Failed,
    /// Work observed cancellation, or was dropped before finishing.
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    fn from_result(result: &Result<(), TaskError>) -> Self {
        match result {
            Ok(()) => TaskState::Completed,
            Err(TaskError::Cancelled) => TaskState::Cancelled,
            Err(_) => TaskState::Failed,
        }
    }
}

/// Receiver side of the supervisor-wide cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled.
    ///
    /// Never resolves if the supervisor is gone without having cancelled.
    pub async fn cancelled(&mut self) {
        let closed = self.rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Handle returned from [`TaskSupervisor::spawn`].
///
/// Observes the task's state; it does not own the task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    state: watch::Receiver<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Wait for the task to reach a terminal state.
    ///
    /// By the time this resolves the task has left the supervisor's set.
    pub async fn wait(&mut self) -> TaskState {
        let terminal = self
            .state
            .wait_for(|state| state.is_terminal())
            .await
            .map(|state| *state);
        terminal.unwrap_or_else(|_| *self.state.borrow())
    }
}

struct TaskEntry {
    label: &'static str,
    spawned_at: Instant,
}

struct Inner {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    next_id: AtomicU64,
    cancel_tx: watch::Sender<bool>,
    idle: Notify,
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
        // Entries stay consistent even if a holder panicked.
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tracks every deferred task from spawn until its terminal state.
///
/// Cheap to clone; clones share the same task set.
#[derive(Clone)]
pub struct TaskSupervisor {
    inner: Arc<Inner>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                cancel_tx,
                idle: Notify::new(),
            }),
        }
    }

    /// Register and start a background task.
    ///
    /// The task is in the set when this returns. `work` receives the
    /// cancellation signal and should race it against its own suspension
    /// points, returning [`TaskError::Cancelled`] when it fires.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(&self, label: &'static str, work: F) -> TaskHandle
    where
        F: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (state_tx, state_rx) = watch::channel(TaskState::Spawned);

        let in_flight = {
            let mut tasks = self.inner.tasks();
            tasks.insert(
                id,
                TaskEntry {
                    label,
                    spawned_at: Instant::now(),
                },
            );
            tasks.len()
        };

        let mut guard = TaskGuard {
            inner: Arc::clone(&self.inner),
            id,
            label,
            state_tx,
            terminal: None,
        };
        let work = work(self.cancel_signal());

        tokio::spawn(async move {
            guard.mark_running();
            let result = work.await;
            guard.record(&result);
        });

        debug!(task_id = %id, label = label, in_flight = in_flight, "task_spawned");

        TaskHandle {
            id,
            state: state_rx,
        }
    }

    /// A fresh receiver of the cancellation flag.
    pub fn cancel_signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.inner.cancel_tx.subscribe(),
        }
    }

    /// Whether [`drain`](Self::drain) has signalled cancellation.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel_tx.borrow()
    }

    /// Number of tasks currently in the set.
    pub fn len(&self) -> usize {
        self.inner.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait, without cancelling anything, until the set is empty.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), DrainError> {
        let idle = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                // Register interest before checking, so a removal between
                // the check and the await is not missed.
                notified.as_mut().enable();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(timeout, idle).await.is_ok() {
            return Ok(());
        }

        let tasks = self.inner.tasks();
        if tasks.is_empty() {
            return Ok(());
        }
        for (id, entry) in tasks.iter() {
            warn!(
                task_id = %id,
                label = entry.label,
                age_ms = entry.spawned_at.elapsed().as_millis() as u64,
                "task_still_running"
            );
        }
        Err(DrainError::Timeout {
            remaining: tasks.len(),
        })
    }

    /// Signal cancellation to every task, then wait for the set to empty.
    ///
    /// Calling this again, or on an empty set, is harmless.
    pub async fn drain(&self, timeout: Duration) -> Result<(), DrainError> {
        let already_cancelled = self.inner.cancel_tx.send_replace(true);
        info!(
            in_flight = self.len(),
            already_cancelled = already_cancelled,
            timeout_ms = timeout.as_millis() as u64,
            "supervisor_drain_started"
        );

        match self.wait_idle(timeout).await {
            Ok(()) => {
                info!("supervisor_drain_complete");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "supervisor_drain_timeout");
                Err(e)
            }
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("in_flight", &self.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Owns a task's set entry. Removes it and publishes the terminal state on
/// drop.
struct TaskGuard {
    inner: Arc<Inner>,
    id: TaskId,
    label: &'static str,
    state_tx: watch::Sender<TaskState>,
    terminal: Option<TaskState>,
}

impl TaskGuard {
    fn mark_running(&self) {
        self.state_tx.send_replace(TaskState::Running);
    }

    fn record(&mut self, result: &Result<(), TaskError>) {
        if let Err(e) = result {
            match e {
                TaskError::Cancelled => {
                    debug!(task_id = %self.id, label = self.label, "task_cancelled")
                }
                _ => warn!(task_id = %self.id, label = self.label, error = %e, "task_failed"),
            }
        }
        self.terminal = Some(TaskState::from_result(result));
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let state = self.terminal.unwrap_or(if std::thread::panicking() {
            TaskState::Failed
        } else {
            TaskState::Cancelled
        });

        let (entry, remaining) = {
            let mut tasks = self.inner.tasks();
            let entry = tasks.remove(&self.id);
            (entry, tasks.len())
        };
        if remaining == 0 {
            self.inner.idle.notify_waiters();
        }

        // Publish only after removal so waiters on the handle see the set
        // without this task.
        self.state_tx.send_replace(state);

        debug!(
            task_id = %self.id,
            label = self.label,
            state = ?state,
            elapsed_ms = entry.map(|e| e.spawned_at.elapsed().as_millis() as u64),
            remaining = remaining,
            "task_finished"
        );
    }
}

//! Single-lane timed task scheduler.
//!
//! The scheduler accepts [`TaskFn`] submissions, holds delayed work until its
//! delay elapses, pushes it onto one [`crossbeam::queue::SegQueue`] and drives
//! execution via a background tokio task that runs queued tasks one at a
//! time.  Two tasks never execute concurrently, which gives every caller the
//! same cooperative timeline.
//!
//! # Task lifecycle
//!
//! ```text
//! Pending  -->  Queued  -->  Running  -->  Completed
//!    \            \                   \->  Failed
//!     \------------\-->  Cancelled
//! ```
//!
//! Tasks may be cancelled at any point before they enter the `Running`
//! state.  [`Scheduler::wait`] resolves once a task reaches any terminal
//! state, which makes each submission an awaitable unit of work.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{KernelError, Result};

/// How long finished tasks stay queryable before the worker drops them.
const FINISHED_RETENTION: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Unique, time-ordered task identifier (UUID v7).
pub type TaskId = Uuid;

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Created but not yet enqueued (e.g. waiting for a delay).
    Pending,
    /// Sitting in the queue, waiting for the worker to pick it up.
    Queued,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before execution.
    Cancelled,
}

impl TaskStatus {
    /// Whether the task will never change state again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// When the task should first become eligible for execution.
#[derive(Debug, Clone)]
pub enum SchedulePolicy {
    /// Execute as soon as the worker picks it up.
    Immediate,
    /// Execute after `delay` has elapsed.
    Delayed { delay: Duration },
}

/// The async closure that the scheduler will execute.
///
/// The future is boxed so that callers can supply arbitrary async work
/// without leaking concrete types into the scheduler.
pub type TaskFn = Box<
    dyn FnOnce() -> Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send>>
        + Send
        + Sync,
>;

/// Metadata snapshot of a task visible to external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Internal representation of a task that lives on the queue.
struct QueuedTask {
    id: TaskId,
    name: String,
    work: TaskFn,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Single-lane task scheduler.
///
/// The scheduler is cheaply cloneable (`Arc`-backed) and safe to share across
/// threads and async tasks.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    /// FIFO of tasks whose delay has elapsed.
    queue: SegQueue<QueuedTask>,

    /// Authoritative task metadata.
    tasks: DashMap<TaskId, TaskInfo>,

    /// Per-task status channel backing [`Scheduler::wait`].
    watchers: DashMap<TaskId, watch::Sender<TaskStatus>>,

    /// Wakes the background worker when new work arrives.
    notify: Notify,

    /// When `true` the scheduler will not accept new work.
    shutdown: AtomicBool,
}

impl Scheduler {
    /// Create a new scheduler **without** starting the background worker.
    ///
    /// Call [`Scheduler::start`] to spawn the worker onto the tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: SegQueue::new(),
                tasks: DashMap::new(),
                watchers: DashMap::new(),
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the background worker that drains the queue.
    ///
    /// Returns a [`JoinHandle`] that resolves when the scheduler is shut down.
    pub fn start(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tracing::info!("scheduler worker started");
            Self::worker_loop(&inner).await;
            tracing::info!("scheduler worker stopped");
        })
    }

    /// Submit a task for immediate execution.
    pub fn submit(&self, name: impl Into<String>, work: TaskFn) -> Result<TaskId> {
        self.submit_with_policy(name, SchedulePolicy::Immediate, work)
    }

    /// Submit a task that becomes eligible after `delay`.
    pub fn submit_delayed(
        &self,
        name: impl Into<String>,
        delay: Duration,
        work: TaskFn,
    ) -> Result<TaskId> {
        self.submit_with_policy(name, SchedulePolicy::Delayed { delay }, work)
    }

    /// Submit a task with a specific [`SchedulePolicy`].
    pub fn submit_with_policy(
        &self,
        name: impl Into<String>,
        policy: SchedulePolicy,
        work: TaskFn,
    ) -> Result<TaskId> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(KernelError::SchedulerShutdown);
        }

        let id = Uuid::now_v7();
        let name = name.into();

        let info = TaskInfo {
            id,
            name: name.clone(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        };
        self.inner.tasks.insert(id, info);
        let (tx, _) = watch::channel(TaskStatus::Pending);
        self.inner.watchers.insert(id, tx);

        tracing::debug!(task_id = %id, task_name = %name, ?policy, "task submitted");

        match policy {
            SchedulePolicy::Immediate => {
                self.enqueue(id, name, work);
            }
            SchedulePolicy::Delayed { delay } => {
                let scheduler = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    scheduler.enqueue(id, name, work);
                });
            }
        }

        Ok(id)
    }

    /// Cancel a task that has not yet started running.
    ///
    /// Tasks that are already `Running`, `Completed`, `Failed`, or
    /// `Cancelled` cannot be cancelled through this method.
    pub fn cancel(&self, task_id: TaskId) -> Result<()> {
        {
            let mut entry = self
                .inner
                .tasks
                .get_mut(&task_id)
                .ok_or(KernelError::TaskNotFound { task_id })?;

            match entry.status {
                TaskStatus::Pending | TaskStatus::Queued => {
                    entry.status = TaskStatus::Cancelled;
                    entry.completed_at = Some(Utc::now());
                }
                other => {
                    return Err(KernelError::InvalidTaskState {
                        task_id,
                        reason: format!("cannot cancel task in state {other:?}"),
                    });
                }
            }
        }

        self.inner.broadcast(task_id, TaskStatus::Cancelled);
        tracing::info!(task_id = %task_id, "task cancelled");
        Ok(())
    }

    /// Query the current status of a task.
    pub fn status(&self, task_id: TaskId) -> Result<TaskInfo> {
        self.inner
            .tasks
            .get(&task_id)
            .map(|entry| entry.clone())
            .ok_or(KernelError::TaskNotFound { task_id })
    }

    /// Wait until the task reaches a terminal state and return that state.
    ///
    /// Finished tasks answer from their recorded status until they are
    /// pruned, after which this fails with [`KernelError::TaskNotFound`].
    pub async fn wait(&self, task_id: TaskId) -> Result<TaskStatus> {
        let Some(mut rx) = self.inner.watchers.get(&task_id).map(|tx| tx.subscribe()) else {
            return self.status(task_id).map(|info| info.status);
        };

        loop {
            let current = *rx.borrow_and_update();
            if current.is_terminal() {
                return Ok(current);
            }
            if rx.changed().await.is_err() {
                // Sender dropped with the scheduler; report the last known state.
                return self.status(task_id).map(|info| info.status);
            }
        }
    }

    /// Return a snapshot of all known tasks keyed by their ID.
    pub fn all_tasks(&self) -> HashMap<TaskId, TaskInfo> {
        self.inner
            .tasks
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Drop finished tasks that completed at least `older_than` ago.
    ///
    /// Returns how many were removed.  The worker calls this after every
    /// task with a one minute retention.
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        self.inner.prune_finished(older_than)
    }

    /// Whether [`Scheduler::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting new work and cancel everything that has not started.
    ///
    /// The background worker exits after the current task (if any) finishes.
    pub fn shutdown(&self) {
        tracing::info!("scheduler shutdown requested");
        self.inner.shutdown.store(true, Ordering::Release);

        let waiting: Vec<TaskId> = self
            .inner
            .tasks
            .iter()
            .filter(|e| matches!(e.status, TaskStatus::Pending | TaskStatus::Queued))
            .map(|e| *e.key())
            .collect();
        for id in waiting {
            if let Err(e) = self.cancel(id) {
                tracing::debug!(task_id = %id, error = %e, "task finished during shutdown");
            }
        }

        self.inner.notify.notify_one();
    }

    // -- Private helpers ----------------------------------------------------

    /// Move a task from `Pending` to `Queued` and push it onto the queue.
    fn enqueue(&self, id: TaskId, name: String, work: TaskFn) {
        {
            // Cancelled (and possibly pruned) while waiting for its delay.
            let Some(mut entry) = self.inner.tasks.get_mut(&id) else {
                tracing::debug!(task_id = %id, "skipping enqueue for pruned task");
                return;
            };
            if entry.status == TaskStatus::Cancelled {
                tracing::debug!(task_id = %id, "skipping enqueue for cancelled task");
                return;
            }
            entry.status = TaskStatus::Queued;
        }
        self.inner.broadcast(id, TaskStatus::Queued);

        self.inner.queue.push(QueuedTask { id, name, work });
        self.inner.notify.notify_one();
    }

    /// Background worker loop.
    async fn worker_loop(inner: &SchedulerInner) {
        loop {
            match inner.queue.pop() {
                Some(queued) => {
                    // Claim the task unless it was cancelled while queued.
                    let claimed = inner
                        .tasks
                        .get_mut(&queued.id)
                        .map(|mut entry| {
                            if entry.status != TaskStatus::Queued {
                                return false;
                            }
                            entry.status = TaskStatus::Running;
                            entry.started_at = Some(Utc::now());
                            true
                        })
                        .unwrap_or(false);

                    if !claimed {
                        tracing::debug!(task_id = %queued.id, "skipping cancelled task");
                        continue;
                    }
                    inner.broadcast(queued.id, TaskStatus::Running);

                    tracing::debug!(
                        task_id = %queued.id,
                        task_name = %queued.name,
                        "task running"
                    );

                    let result = (queued.work)().await;

                    let final_status = match result {
                        Ok(()) => TaskStatus::Completed,
                        Err(_) => TaskStatus::Failed,
                    };
                    if let Some(mut entry) = inner.tasks.get_mut(&queued.id) {
                        entry.completed_at = Some(Utc::now());
                        entry.status = final_status;
                        match result {
                            Ok(()) => {
                                tracing::debug!(task_id = %queued.id, "task completed");
                            }
                            Err(err) => {
                                tracing::error!(
                                    task_id = %queued.id,
                                    error = %err,
                                    "task failed"
                                );
                                entry.error = Some(err);
                            }
                        }
                    }
                    inner.broadcast(queued.id, final_status);

                    let pruned = inner.prune_finished(FINISHED_RETENTION);
                    if pruned > 0 {
                        tracing::debug!(pruned, "finished tasks pruned");
                    }
                }
                None => {
                    if inner.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    // Park until notified of new work or shutdown.
                    inner.notify.notified().await;

                    if inner.shutdown.load(Ordering::Acquire) && inner.queue.is_empty() {
                        break;
                    }
                }
            }
        }
    }
}

impl SchedulerInner {
    /// Publish a status change to anyone blocked in [`Scheduler::wait`].
    ///
    /// A terminal status is the last one, so its channel is dropped with it.
    fn broadcast(&self, task_id: TaskId, status: TaskStatus) {
        if status.is_terminal() {
            if let Some((_, tx)) = self.watchers.remove(&task_id) {
                tx.send_replace(status);
            }
        } else if let Some(tx) = self.watchers.get(&task_id) {
            tx.send_replace(status);
        }
    }

    fn prune_finished(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::TimeDelta::from_std(older_than) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };

        let mut removed = 0;
        self.tasks.retain(|_, info| {
            let expired = info.status.is_terminal()
                && info.completed_at.is_some_and(|done| done <= cutoff);
            if expired {
                removed += 1;
            }
            !expired
        });
        removed
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn noop() -> TaskFn {
        Box::new(|| Box::pin(async { Ok(()) }))
    }

    #[tokio::test]
    async fn submit_and_complete() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();

        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);

        let id = scheduler
            .submit(
                "test-task",
                Box::new(move || {
                    let c = Arc::clone(&c);
                    Box::pin(async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .expect("submit should succeed");

        let status = scheduler.wait(id).await.expect("wait");
        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let info = scheduler.status(id).expect("task should exist");
        assert!(info.started_at.is_some());
        assert!(info.completed_at.is_some());

        scheduler.shutdown();
        handle.await.expect("worker should exit cleanly");
    }

    #[tokio::test]
    async fn fifo_ordering() {
        let scheduler = Scheduler::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let o = Arc::clone(&order);
            scheduler
                .submit(
                    label,
                    Box::new(move || {
                        Box::pin(async move {
                            o.lock().unwrap().push(label);
                            Ok(())
                        })
                    }),
                )
                .expect("submit");
        }

        // Start the worker after everything is queued so ordering is
        // deterministic.
        let handle = scheduler.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = order.lock().unwrap().clone();
        assert_eq!(result, vec!["first", "second", "third"]);

        scheduler.shutdown();
        handle.await.expect("worker exit");
    }

    #[tokio::test]
    async fn delayed_task_waits_for_delay() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();

        let started = tokio::time::Instant::now();
        let id = scheduler
            .submit_delayed("later", Duration::from_millis(40), noop())
            .expect("submit");
        assert_eq!(scheduler.status(id).unwrap().status, TaskStatus::Pending);

        let status = scheduler.wait(id).await.expect("wait");
        assert_eq!(status, TaskStatus::Completed);
        assert!(started.elapsed() >= Duration::from_millis(40));

        scheduler.shutdown();
        handle.await.expect("worker exit");
    }

    #[tokio::test]
    async fn cancel_pending_task() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();

        let id = scheduler
            .submit_delayed("cancel-me", Duration::from_secs(60), noop())
            .expect("submit");

        scheduler.cancel(id).expect("cancel should succeed");
        let info = scheduler.status(id).expect("task should exist");
        assert_eq!(info.status, TaskStatus::Cancelled);
        assert_eq!(scheduler.wait(id).await.unwrap(), TaskStatus::Cancelled);

        scheduler.shutdown();
        handle.await.expect("worker exit");
    }

    #[tokio::test]
    async fn cancel_completed_task_fails() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();

        let id = scheduler.submit("quick", noop()).expect("submit");
        scheduler.wait(id).await.expect("wait");

        let result = scheduler.cancel(id);
        assert!(matches!(result, Err(KernelError::InvalidTaskState { .. })));

        scheduler.shutdown();
        handle.await.expect("worker exit");
    }

    #[tokio::test]
    async fn task_failure_is_recorded() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();

        let id = scheduler
            .submit(
                "fail-task",
                Box::new(|| Box::pin(async { Err("boom".to_string()) })),
            )
            .expect("submit");

        assert_eq!(scheduler.wait(id).await.unwrap(), TaskStatus::Failed);
        let info = scheduler.status(id).expect("task should exist");
        assert_eq!(info.error.as_deref(), Some("boom"));

        scheduler.shutdown();
        handle.await.expect("worker exit");
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let scheduler = Scheduler::new();
        scheduler.shutdown();

        let result = scheduler.submit("late-task", noop());
        assert!(matches!(result, Err(KernelError::SchedulerShutdown)));
    }

    #[tokio::test]
    async fn shutdown_cancels_waiting_tasks() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();

        let id = scheduler
            .submit_delayed("never", Duration::from_secs(60), noop())
            .expect("submit");
        scheduler.shutdown();

        assert_eq!(scheduler.wait(id).await.unwrap(), TaskStatus::Cancelled);
        handle.await.expect("worker exit");
    }

    #[tokio::test]
    async fn finished_task_releases_its_watcher() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();

        let id = scheduler.submit("short-lived", noop()).expect("submit");
        assert_eq!(scheduler.wait(id).await.unwrap(), TaskStatus::Completed);
        assert!(scheduler.inner.watchers.is_empty());

        // Still answers from the recorded status.
        assert_eq!(scheduler.wait(id).await.unwrap(), TaskStatus::Completed);

        let cancelled = scheduler
            .submit_delayed("dropped", Duration::from_secs(60), noop())
            .expect("submit");
        scheduler.cancel(cancelled).expect("cancel");
        assert!(scheduler.inner.watchers.is_empty());

        scheduler.shutdown();
        handle.await.expect("worker exit");
    }

    #[tokio::test]
    async fn prune_drops_only_finished_tasks() {
        let scheduler = Scheduler::new();
        let handle = scheduler.start();

        let done = scheduler.submit("done", noop()).expect("submit");
        scheduler.wait(done).await.expect("wait");
        let waiting = scheduler
            .submit_delayed("waiting", Duration::from_secs(60), noop())
            .expect("submit");

        assert_eq!(scheduler.prune_finished(Duration::from_secs(3600)), 0);
        assert_eq!(scheduler.prune_finished(Duration::ZERO), 1);

        let tasks = scheduler.all_tasks();
        assert!(!tasks.contains_key(&done));
        assert_eq!(tasks[&waiting].status, TaskStatus::Pending);
        assert!(matches!(
            scheduler.wait(done).await,
            Err(KernelError::TaskNotFound { .. })
        ));

        scheduler.shutdown();
        handle.await.expect("worker exit");
    }

    #[tokio::test]
    async fn wait_unknown_task_fails() {
        let scheduler = Scheduler::new();
        let result = scheduler.wait(Uuid::now_v7()).await;
        assert!(matches!(result, Err(KernelError::TaskNotFound { .. })));
    }
}

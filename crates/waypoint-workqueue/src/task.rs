//! Task identity, handles and statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::AbortHandle;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{WorkQueueError, WorkQueueResult};

/// Unique identifier for a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A handle to a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    result: oneshot::Receiver<WorkQueueResult<T>>,
    abort: AbortHandle,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        id: TaskId,
        result: oneshot::Receiver<WorkQueueResult<T>>,
        abort: AbortHandle,
    ) -> Self {
        Self { id, result, abort }
    }

    /// Get the task ID.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Abort the task.
    ///
    /// A task still in the backlog never starts; a running task stops at its
    /// next await point.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Wait for the task to complete.
    ///
    /// The error is whatever kept the task from producing its output: it was
    /// discarded on shutdown, panicked, or was aborted.
    pub async fn join(self) -> WorkQueueResult<T> {
        match self.result.await {
            Ok(result) => result,
            Err(_) => Err(WorkQueueError::cancelled("task discarded before it ran")),
        }
    }
}

/// Task execution statistics.
#[derive(Debug, Default)]
pub struct TaskStats {
    /// Tasks accepted by the queue.
    pub accepted: AtomicU64,
    /// Tasks refused because the queue was saturated.
    pub rejected: AtomicU64,
    /// Tasks that ran to completion.
    pub completed: AtomicU64,
    /// Tasks that panicked.
    pub failed: AtomicU64,
    /// Queued tasks discarded on shutdown.
    pub cancelled: AtomicU64,
}

impl TaskStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted task.
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected task.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task completion.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task panic.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a discarded task.
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total accepted count.
    pub fn total_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Get rejected count.
    pub fn total_rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Get completed count.
    pub fn total_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get failed count.
    pub fn total_failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Get cancelled count.
    pub fn total_cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Get success rate (0.0 to 1.0) over finished tasks.
    pub fn success_rate(&self) -> f64 {
        let completed = self.total_completed();
        let total = completed + self.total_failed();
        if total == 0 {
            1.0
        } else {
            completed as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_new() {
        assert_ne!(TaskId::new(), TaskId::new());
        assert!(!TaskId::new().to_string().is_empty());
    }

    #[test]
    fn test_task_stats() {
        let stats = TaskStats::new();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_rejected();
        stats.record_completed();
        stats.record_failed();

        assert_eq!(stats.total_accepted(), 2);
        assert_eq!(stats.total_rejected(), 1);
        assert_eq!(stats.success_rate(), 0.5);
    }

    #[test]
    fn test_empty_success_rate() {
        assert_eq!(TaskStats::new().success_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_join_reports_dropped_sender_as_cancelled() {
        let (tx, rx) = oneshot::channel::<WorkQueueResult<u8>>();
        let (abort, _) = AbortHandle::new_pair();
        let handle = TaskHandle::new(TaskId::new(), rx, abort);
        drop(tx);
        assert!(matches!(handle.join().await, Err(WorkQueueError::Cancelled(_))));
    }
}

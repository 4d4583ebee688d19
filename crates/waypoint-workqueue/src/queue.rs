//! The bounded automatic work queue.
//!
//! A [`WorkQueue`] runs futures on a pool of tokio worker tasks with two
//! limits:
//!
//! - `high_water_mark` tasks run at once (the most workers the pool grows to);
//! - `max_queue_size` further tasks may wait for a worker (the backlog).
//!
//! When both are exhausted [`WorkQueue::execute`] fails immediately with
//! [`WorkQueueError::Rejected`] instead of blocking, so callers can degrade to
//! running the work inline. Once accepted, a task always runs unless the queue
//! is shut down without `process_remaining`.
//!
//! Workers take tasks from the backlog in submission order. Up to
//! `low_water_mark` workers stay alive while idle; the rest exit after
//! `dequeue_timeout` without work.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{abortable, BoxFuture};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{WorkQueueError, WorkQueueResult};
use crate::task::{TaskHandle, TaskId, TaskStats};

/// Identity of a queue instance, used to tell executors apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkQueueId(Uuid);

impl WorkQueueId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for WorkQueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for a work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkQueueConfig {
    /// Queue name, used in logs and metrics.
    pub name: String,
    /// Maximum tasks waiting for a worker.
    pub max_queue_size: usize,
    /// Maximum tasks running at once.
    pub high_water_mark: usize,
    /// Workers kept alive while idle.
    pub low_water_mark: usize,
    /// How long a worker beyond `low_water_mark` waits for work before exiting.
    pub dequeue_timeout: Duration,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            name: crate::DEFAULT_QUEUE.to_string(),
            max_queue_size: 256,
            high_water_mark: 25,
            low_water_mark: 5,
            dequeue_timeout: Duration::from_secs(120),
        }
    }
}

impl WorkQueueConfig {
    /// Create a configuration with defaults and the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the backlog size.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the maximum number of running tasks.
    pub fn with_high_water_mark(mut self, hwm: usize) -> Self {
        self.high_water_mark = hwm;
        self
    }

    /// Set the number of workers kept alive while idle.
    pub fn with_low_water_mark(mut self, lwm: usize) -> Self {
        self.low_water_mark = lwm;
        self
    }

    /// Set the idle keep-alive for surplus workers.
    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> WorkQueueResult<()> {
        if self.high_water_mark == 0 {
            return Err(WorkQueueError::invalid_config(
                "high_water_mark must be greater than zero",
            ));
        }
        if self.low_water_mark > self.high_water_mark {
            return Err(WorkQueueError::invalid_config(format!(
                "low_water_mark ({}) exceeds high_water_mark ({})",
                self.low_water_mark, self.high_water_mark
            )));
        }
        if self.dequeue_timeout.is_zero() {
            return Err(WorkQueueError::invalid_config(
                "dequeue_timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.high_water_mark.saturating_add(self.max_queue_size)
    }
}

struct Queued {
    id: TaskId,
    job: BoxFuture<'static, ()>,
}

/// Backlog and worker bookkeeping, guarded together so capacity checks see a
/// consistent count.
#[derive(Default)]
struct Pool {
    backlog: VecDeque<Queued>,
    workers: usize,
    idle: usize,
    running: usize,
}

impl Pool {
    fn in_flight(&self) -> usize {
        self.running + self.backlog.len()
    }
}

struct Shared {
    config: WorkQueueConfig,
    pool: Mutex<Pool>,
    work_ready: Notify,
    stats: TaskStats,
    shutdown: AtomicBool,
}

impl Shared {
    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    async fn work(self: Arc<Self>) {
        loop {
            let next = {
                let mut pool = self.pool.lock();
                match pool.backlog.pop_front() {
                    Some(queued) => {
                        pool.running += 1;
                        Some(queued)
                    }
                    None if self.is_shutdown() => {
                        pool.workers -= 1;
                        return;
                    }
                    None => {
                        pool.idle += 1;
                        None
                    }
                }
            };

            let Some(queued) = next else {
                let woken =
                    tokio::time::timeout(self.config.dequeue_timeout, self.work_ready.notified())
                        .await
                        .is_ok();
                let mut pool = self.pool.lock();
                pool.idle -= 1;
                let surplus = pool.workers > self.config.low_water_mark;
                if pool.backlog.is_empty() && (self.is_shutdown() || (!woken && surplus)) {
                    pool.workers -= 1;
                    debug!(work_queue = %self.config.name, workers = pool.workers, "idle worker exiting");
                    return;
                }
                continue;
            };

            self.run(queued).await;
            self.pool.lock().running -= 1;
        }
    }

    async fn run(&self, queued: Queued) {
        match AssertUnwindSafe(queued.job).catch_unwind().await {
            Ok(()) => self.stats.record_completed(),
            Err(panic) => {
                self.stats.record_failed();
                let reason = panic_message(panic.as_ref());
                error!(work_queue = %self.config.name, task_id = %queued.id, reason = %reason, "task panicked");
            }
        }
    }
}

/// A bounded pool of tokio workers with a bounded FIFO backlog.
///
/// Must be used from within a tokio runtime.
pub struct WorkQueue {
    id: WorkQueueId,
    shared: Arc<Shared>,
}

impl WorkQueue {
    /// Create a queue after validating its configuration.
    pub fn new(config: WorkQueueConfig) -> WorkQueueResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Create a queue with default configuration.
    pub fn with_defaults() -> Self {
        Self::build(WorkQueueConfig::default())
    }

    fn build(config: WorkQueueConfig) -> Self {
        Self {
            id: WorkQueueId::new(),
            shared: Arc::new(Shared {
                config,
                pool: Mutex::new(Pool::default()),
                work_ready: Notify::new(),
                stats: TaskStats::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Queue identity.
    pub fn id(&self) -> WorkQueueId {
        self.id
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Queue configuration.
    pub fn config(&self) -> &WorkQueueConfig {
        &self.shared.config
    }

    /// Task statistics.
    pub fn stats(&self) -> &TaskStats {
        &self.shared.stats
    }

    /// Backlog capacity.
    pub fn max_size(&self) -> usize {
        self.shared.config.max_queue_size
    }

    /// Number of tasks waiting for a worker.
    pub fn size(&self) -> usize {
        self.shared.pool.lock().backlog.len()
    }

    /// Number of tasks currently running.
    pub fn active_count(&self) -> usize {
        self.shared.pool.lock().running
    }

    /// Number of live worker tasks, busy or idle.
    pub fn worker_count(&self) -> usize {
        self.shared.pool.lock().workers
    }

    /// Returns true if no task is waiting for a worker.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns true if the next submission would be rejected.
    pub fn is_full(&self) -> bool {
        self.shared.pool.lock().in_flight() >= self.shared.config.capacity()
    }

    /// Returns true once [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Runs `task` on a worker, queueing it if all workers are busy.
    ///
    /// Never blocks. Fails with [`WorkQueueError::Rejected`] when the backlog
    /// is full.
    pub fn execute<F>(&self, task: F) -> WorkQueueResult<TaskId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = TaskId::new();
        self.ensure_open()?;
        self.try_enqueue(Queued {
            id,
            job: Box::pin(task),
        })
        .map_err(|_| self.rejected())?;
        Ok(id)
    }

    /// Like [`execute`](Self::execute), but waits up to `timeout` for room.
    pub async fn execute_with_timeout<F>(&self, task: F, timeout: Duration) -> WorkQueueResult<TaskId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        let id = TaskId::new();
        let mut queued = Queued {
            id,
            job: Box::pin(task),
        };
        loop {
            self.ensure_open()?;
            match self.try_enqueue(queued) {
                Ok(()) => return Ok(id),
                Err(back) if tokio::time::Instant::now() < deadline => {
                    queued = back;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Err(_) => return Err(self.rejected()),
            }
        }
    }

    /// Runs `task` on a worker and returns a joinable handle for its output.
    pub fn submit<F, T>(&self, task: F) -> WorkQueueResult<TaskHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = TaskId::new();
        let (tx, rx) = oneshot::channel();
        let (task, abort) = abortable(task);
        let job = async move {
            let output = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(_)) => Err(WorkQueueError::cancelled("task was aborted")),
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    let _ = tx.send(Err(WorkQueueError::panicked(reason)));
                    std::panic::resume_unwind(panic);
                }
            };
            let _ = tx.send(output);
        };

        self.ensure_open()?;
        self.try_enqueue(Queued {
            id,
            job: Box::pin(job),
        })
        .map_err(|_| self.rejected())?;
        Ok(TaskHandle::new(id, rx, abort))
    }

    /// Submits `task` after `delay`.
    ///
    /// The delay does not occupy a worker or backlog slot; capacity is checked
    /// when the delay elapses, and a rejection at that point is logged.
    pub fn schedule<F>(self: &Arc<Self>, task: F, delay: Duration) -> WorkQueueResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.ensure_open()?;
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = queue.execute(task) {
                warn!(work_queue = %queue.name(), error = %e, "scheduled task not run");
            }
        });
        Ok(())
    }

    /// Stops accepting work.
    ///
    /// With `process_remaining` the backlog still drains; otherwise tasks that
    /// have not reached a worker are discarded. Running tasks always finish.
    pub fn shutdown(&self, process_remaining: bool) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let discarded: Vec<Queued> = if process_remaining {
            Vec::new()
        } else {
            self.shared.pool.lock().backlog.drain(..).collect()
        };
        for queued in &discarded {
            self.shared.stats.record_cancelled();
            debug!(work_queue = %self.name(), task_id = %queued.id, "queued task discarded on shutdown");
        }
        info!(
            work_queue = %self.name(),
            process_remaining,
            discarded = discarded.len(),
            queued = self.size(),
            "shutting down work queue"
        );
        drop(discarded);
        self.shared.work_ready.notify_waiters();
    }

    /// Waits until no task is queued or running, up to `timeout`.
    ///
    /// Returns `true` if the queue drained in time.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let in_flight = self.shared.pool.lock().in_flight();
            if in_flight == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(work_queue = %self.name(), in_flight, "work queue did not drain before timeout");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn ensure_open(&self) -> WorkQueueResult<()> {
        if self.is_shutdown() {
            return Err(WorkQueueError::Shutdown(self.name().to_string()));
        }
        Ok(())
    }

    /// Appends to the backlog, starting a worker if none is free. Hands the
    /// task back when the queue is at capacity.
    fn try_enqueue(&self, queued: Queued) -> Result<(), Queued> {
        let config = &self.shared.config;
        let id = queued.id;
        let (start_worker, wake_idle) = {
            let mut pool = self.shared.pool.lock();
            if pool.in_flight() >= config.capacity() {
                return Err(queued);
            }
            pool.backlog.push_back(queued);
            let wake_idle = pool.idle > 0;
            let start_worker = !wake_idle && pool.workers < config.high_water_mark;
            if start_worker {
                pool.workers += 1;
            }
            (start_worker, wake_idle)
        };

        self.shared.stats.record_accepted();
        debug!(work_queue = %config.name, task_id = %id, "task accepted");
        if start_worker {
            tokio::spawn(Arc::clone(&self.shared).work());
        } else if wake_idle {
            self.shared.work_ready.notify_one();
        }
        Ok(())
    }

    fn rejected(&self) -> WorkQueueError {
        let name = self.name();
        self.shared.stats.record_rejected();
        waypoint_telemetry::metrics::record_work_queue_rejected(name);
        debug!(work_queue = %name, "work queue saturated");
        WorkQueueError::rejected(name, self.shared.config.capacity())
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pool = self.shared.pool.lock();
        f.debug_struct("WorkQueue")
            .field("id", &self.id)
            .field("name", &self.shared.config.name)
            .field("workers", &pool.workers)
            .field("running", &pool.running)
            .field("queued", &pool.backlog.len())
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

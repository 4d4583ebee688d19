//! Named work queues.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::error::{WorkQueueError, WorkQueueResult};
use crate::queue::{WorkQueue, WorkQueueConfig};
use crate::DEFAULT_QUEUE;

/// Process-wide registry of work queues by name.
///
/// The automatic queue, registered under [`DEFAULT_QUEUE`], is created on
/// first use with default configuration unless one was added explicitly.
#[derive(Debug, Default)]
pub struct WorkQueueManager {
    queues: DashMap<String, Arc<WorkQueue>>,
}

impl WorkQueueManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager whose automatic queue uses `config`.
    pub fn with_automatic(config: WorkQueueConfig) -> WorkQueueResult<Self> {
        let manager = Self::new();
        let queue = WorkQueue::new(WorkQueueConfig {
            name: DEFAULT_QUEUE.to_string(),
            ..config
        })?;
        manager.add(Arc::new(queue));
        Ok(manager)
    }

    /// Returns the automatic queue, creating it if needed.
    pub fn automatic_work_queue(&self) -> Arc<WorkQueue> {
        let entry = self
            .queues
            .entry(DEFAULT_QUEUE.to_string())
            .or_insert_with(|| Arc::new(WorkQueue::with_defaults()));
        Arc::clone(entry.value())
    }

    /// Registers a queue under its own name, replacing any previous one.
    pub fn add(&self, queue: Arc<WorkQueue>) -> Option<Arc<WorkQueue>> {
        self.queues.insert(queue.name().to_string(), queue)
    }

    /// Looks a queue up by name.
    pub fn get(&self, name: &str) -> WorkQueueResult<Arc<WorkQueue>> {
        self.queues
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| WorkQueueError::NotFound(name.to_string()))
    }

    /// Removes a queue.
    pub fn remove(&self, name: &str) -> Option<Arc<WorkQueue>> {
        self.queues.remove(name).map(|(_, queue)| queue)
    }

    /// Names of all registered queues, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Shuts every queue down.
    pub fn shutdown_all(&self, process_remaining: bool) {
        info!(queues = self.queues.len(), "shutting down all work queues");
        for entry in &self.queues {
            entry.value().shutdown(process_remaining);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automatic_queue_created_once() {
        let manager = WorkQueueManager::new();
        let first = manager.automatic_work_queue();
        let second = manager.automatic_work_queue();
        assert_eq!(first.id(), second.id());
        assert_eq!(manager.names(), vec![DEFAULT_QUEUE.to_string()]);
    }

    #[test]
    fn test_with_automatic_config() {
        let manager =
            WorkQueueManager::with_automatic(WorkQueueConfig::new("ignored").with_high_water_mark(3))
                .unwrap();
        let queue = manager.automatic_work_queue();
        assert_eq!(queue.name(), DEFAULT_QUEUE);
        assert_eq!(queue.config().high_water_mark, 3);
    }

    #[test]
    fn test_named_queues() {
        let manager = WorkQueueManager::new();
        let invoker = Arc::new(WorkQueue::new(WorkQueueConfig::new("invoker")).unwrap());
        assert!(manager.add(invoker.clone()).is_none());

        assert_eq!(manager.get("invoker").unwrap().id(), invoker.id());
        assert!(matches!(manager.get("missing"), Err(WorkQueueError::NotFound(_))));
        assert!(manager.remove("invoker").is_some());
        assert!(manager.get("invoker").is_err());
    }

    #[test]
    fn test_shutdown_all() {
        let manager = WorkQueueManager::new();
        manager.add(Arc::new(WorkQueue::new(WorkQueueConfig::new("a")).unwrap()));
        let automatic = manager.automatic_work_queue();

        manager.shutdown_all(true);

        assert!(automatic.is_shutdown());
        assert!(manager.get("a").unwrap().is_shutdown());
    }
}

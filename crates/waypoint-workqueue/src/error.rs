//! Error types for work queue operations.

use thiserror::Error;

/// Result type for work queue operations.
pub type WorkQueueResult<T> = Result<T, WorkQueueError>;

/// Errors that can occur when submitting to or joining work queue tasks.
#[derive(Debug, Error)]
pub enum WorkQueueError {
    /// Every worker is busy and the backlog is full.
    #[error("work queue '{queue}' rejected task: {capacity} tasks already in flight")]
    Rejected {
        /// Queue name.
        queue: String,
        /// Workers plus backlog slots.
        capacity: usize,
    },

    /// The queue no longer accepts work.
    #[error("work queue '{0}' is shut down")]
    Shutdown(String),

    /// A queued task was discarded before it ran.
    #[error("task cancelled: {0}")]
    Cancelled(String),

    /// The task panicked while running.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Invalid queue configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No queue is registered under this name.
    #[error("work queue not found: {0}")]
    NotFound(String),
}

impl WorkQueueError {
    /// Create a rejection error.
    pub fn rejected(queue: impl Into<String>, capacity: usize) -> Self {
        Self::Rejected {
            queue: queue.into(),
            capacity,
        }
    }

    /// Create a cancelled error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Create a panicked error.
    pub fn panicked(reason: impl Into<String>) -> Self {
        Self::Panicked(reason.into())
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Returns true if the submission was refused because the queue is saturated.
    ///
    /// Callers typically degrade to running the work inline.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_display() {
        let err = WorkQueueError::rejected("default", 281);
        assert_eq!(
            err.to_string(),
            "work queue 'default' rejected task: 281 tasks already in flight"
        );
        assert!(err.is_rejected());
    }

    #[test]
    fn test_other_variants_not_rejected() {
        assert!(!WorkQueueError::Shutdown("default".into()).is_rejected());
        assert!(!WorkQueueError::cancelled("shutdown").is_rejected());
        assert!(WorkQueueError::panicked("boom").to_string().contains("boom"));
        assert!(WorkQueueError::invalid_config("x").to_string().contains("invalid"));
    }
}

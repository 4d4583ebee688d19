//! Bounded automatic work queues for Waypoint.
//!
//! Chains hand work to these queues in two places: one-way exchanges continue
//! on the automatic queue after the acknowledgement is sent, and service
//! invocation may switch to an endpoint-specific queue.
//!
//! # Overview
//!
//! - [`WorkQueue`] - bounded tokio worker pool with a bounded backlog
//! - [`WorkQueueManager`] - named queues plus the automatic default queue
//! - [`TaskHandle`] - joinable handle for submitted work
//!
//! # Example
//!
//! ```ignore
//! use waypoint_workqueue::{WorkQueue, WorkQueueConfig};
//!
//! let queue = WorkQueue::new(WorkQueueConfig::new("invoker").with_high_water_mark(8))?;
//!
//! match queue.execute(async { /* continue the chain */ }) {
//!     Ok(task_id) => tracing::debug!(%task_id, "handed off"),
//!     Err(e) if e.is_rejected() => { /* run inline instead */ }
//!     Err(e) => return Err(e),
//! }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod manager;
pub mod queue;
pub mod task;

pub use error::{WorkQueueError, WorkQueueResult};
pub use manager::WorkQueueManager;
pub use queue::{WorkQueue, WorkQueueConfig, WorkQueueId};
pub use task::{TaskHandle, TaskId, TaskStats};

/// Name of the automatic work queue.
pub const DEFAULT_QUEUE: &str = "default";

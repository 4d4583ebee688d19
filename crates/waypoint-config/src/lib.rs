//! Typed configuration for Waypoint.
//!
//! - TOML and JSON files
//! - `WAYPOINT__SECTION__KEY` environment overrides
//! - strict parsing (unknown keys fail)
//!
//! # Configuration File Format
//!
//! ```toml
//! [phases]
//! inbound = [
//!     { name = "receive", priority = 0 },
//!     { name = "unmarshal", priority = 10 },
//!     { name = "invoke", priority = 20 },
//! ]
//!
//! [work_queue]
//! name = "default"
//! max_queue_size = 256
//! high_water_mark = 25
//! low_water_mark = 5
//! dequeue_timeout_ms = 120000
//!
//! [dispatch]
//! oneway_use_original_thread = false
//!
//! [logging]
//! enabled = true
//! level = "info"
//! format = "json"
//! ansi_enabled = false
//!
//! [metrics]
//! enabled = false
//! ```
//!
//! Phases are fixed once a bus is built; there is no reload.

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::WaypointConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, ENV_PREFIX};
pub use schema::{
    DispatchSection, LogFormat, LoggingSection, MetricsSection, PhaseEntry, PhasesConfig,
    WorkQueueSection,
};

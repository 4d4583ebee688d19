//! Logging and metrics for the Waypoint interceptor pipeline.
//!
//! - **Logging**: structured JSON or pretty output via `tracing-subscriber`
//! - **Metrics**: Prometheus-format counters and histograms via the `metrics` crate
//!
//! The chain and work-queue crates record through the functions in
//! [`metrics`]; applications install the subscriber and recorder once at
//! startup with [`init_telemetry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use waypoint_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let registry = init_telemetry(&TelemetryConfig::default())?;
//! if let Some(registry) = registry {
//!     println!("{}", registry.render());
//! }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogOutput};
pub use metrics::{init_metrics, MetricsConfig, MetricsRegistry};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Configuration for logging and metrics together.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Logging configuration.
    pub logging: LogConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

/// Initializes logging, then metrics.
///
/// Returns the metrics registry when metrics are enabled.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)
}

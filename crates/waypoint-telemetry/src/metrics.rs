//! Prometheus metrics for Waypoint.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `waypoint_chain_completed_total` | Counter | `role` | Chains that ran every interceptor |
//! | `waypoint_chain_aborted_total` | Counter | `role`, `reason` | Chains stopped by a fault or `abort()` |
//! | `waypoint_chain_paused_total` | Counter | `role` | Chains parked by `pause()`/`suspend()` |
//! | `waypoint_fault_chains_total` | Counter | `direction`, `outcome` | Fault chains dispatched |
//! | `waypoint_workqueue_rejected_total` | Counter | `queue` | Tasks rejected by a saturated queue |
//! | `waypoint_interceptor_duration_seconds` | Histogram | `interceptor`, `phase` | Time spent in `handle_message` |
//!
//! The recording functions are safe to call before [`init_metrics`]; without
//! an installed recorder they are no-ops.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Metric names.
pub mod names {
    /// Completed chains.
    pub const CHAIN_COMPLETED: &str = "waypoint_chain_completed_total";
    /// Aborted chains.
    pub const CHAIN_ABORTED: &str = "waypoint_chain_aborted_total";
    /// Paused chains.
    pub const CHAIN_PAUSED: &str = "waypoint_chain_paused_total";
    /// Fault chains.
    pub const FAULT_CHAINS: &str = "waypoint_fault_chains_total";
    /// Work queue rejections.
    pub const WORKQUEUE_REJECTED: &str = "waypoint_workqueue_rejected_total";
    /// Interceptor latency.
    pub const INTERCEPTOR_DURATION: &str = "waypoint_interceptor_duration_seconds";
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are recorded.
    pub enabled: bool,

    /// Histogram buckets for interceptor duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // 100us .. 1s
            duration_buckets: vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ],
        }
    }
}

/// Handle for rendering recorded metrics.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    /// Wraps a Prometheus handle.
    #[must_use]
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// Renders all metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Installs the global Prometheus recorder.
///
/// No HTTP listener is started; render through the returned registry or
/// [`render_metrics`]. Returns `None` when metrics are disabled.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<Option<MetricsRegistry>> {
    if !config.enabled {
        return Ok(None);
    }
    if config.duration_buckets.is_empty() {
        return Err(TelemetryError::InvalidConfig(
            "duration_buckets must not be empty".to_string(),
        ));
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::INTERCEPTOR_DURATION.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle.clone());
    register_metric_descriptions();

    Ok(Some(MetricsRegistry::new(handle)))
}

/// Renders metrics in Prometheus format, if a recorder was installed.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        names::CHAIN_COMPLETED,
        "Interceptor chains that ran every interceptor"
    );
    describe_counter!(
        names::CHAIN_ABORTED,
        "Interceptor chains stopped by a fault or abort"
    );
    describe_counter!(names::CHAIN_PAUSED, "Interceptor chains parked for resume");
    describe_counter!(names::FAULT_CHAINS, "Fault chains dispatched");
    describe_counter!(
        names::WORKQUEUE_REJECTED,
        "Tasks rejected by a saturated work queue"
    );
    describe_histogram!(
        names::INTERCEPTOR_DURATION,
        "Time spent in interceptor handle_message, in seconds"
    );
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Records a chain that ran to completion.
pub fn record_chain_completed(role: &str) {
    counter!(names::CHAIN_COMPLETED, "role" => role.to_string()).increment(1);
}

/// Records an aborted chain. `reason` is a fault code or `"abort"`.
pub fn record_chain_aborted(role: &str, reason: &str) {
    counter!(
        names::CHAIN_ABORTED,
        "role" => role.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Records a chain parking its message.
pub fn record_chain_paused(role: &str) {
    counter!(names::CHAIN_PAUSED, "role" => role.to_string()).increment(1);
}

/// Records a dispatched fault chain and whether it completed.
pub fn record_fault_chain(direction: &str, completed: bool) {
    let outcome = if completed { "complete" } else { "failed" };
    counter!(
        names::FAULT_CHAINS,
        "direction" => direction.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Records a task rejected by a saturated work queue.
pub fn record_work_queue_rejected(queue: &str) {
    counter!(names::WORKQUEUE_REJECTED, "queue" => queue.to_string()).increment(1);
}

/// Records time spent in one interceptor.
pub fn record_interceptor_duration(interceptor: &str, phase: &str, duration: Duration) {
    histogram!(
        names::INTERCEPTOR_DURATION,
        "interceptor" => interceptor.to_string(),
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

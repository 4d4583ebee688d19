//! The root [`WaypointConfig`] type.

use serde::{Deserialize, Serialize};
use waypoint_core::PhaseManager;
use waypoint_telemetry::TelemetryConfig;

use crate::{
    ConfigError, DispatchSection, LogFormat, LoggingSection, MetricsSection, PhasesConfig,
    WorkQueueSection,
};

/// Complete Waypoint configuration.
///
/// Load it with [`ConfigLoader`](crate::ConfigLoader); every section is
/// optional in the file.
///
/// # Example
///
/// ```
/// use waypoint_config::WaypointConfig;
///
/// let config = WaypointConfig::default();
/// assert_eq!(config.work_queue.high_water_mark, 25);
/// assert!(!config.dispatch.oneway_use_original_thread);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct WaypointConfig {
    /// Phase lists.
    #[serde(default)]
    pub phases: PhasesConfig,

    /// Automatic work queue.
    #[serde(default)]
    pub work_queue: WorkQueueSection,

    /// Dispatch behaviour.
    #[serde(default)]
    pub dispatch: DispatchSection,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingSection,

    /// Metrics.
    #[serde(default)]
    pub metrics: MetricsSection,
}

impl WaypointConfig {
    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// - phase lists with duplicate names or non-increasing priorities
    /// - `work_queue.high_water_mark == 0`
    /// - `work_queue.low_water_mark > work_queue.high_water_mark`
    /// - `work_queue.dequeue_timeout_ms == 0`
    /// - an unparsable `logging.level` directive
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.phases.to_phase_manager()?;

        let queue = &self.work_queue;
        if queue.name.is_empty() {
            return Err(ConfigError::invalid_value(
                "work_queue.name",
                "must not be empty",
            ));
        }
        if queue.high_water_mark == 0 {
            return Err(ConfigError::invalid_value(
                "work_queue.high_water_mark",
                "must be greater than zero",
            ));
        }
        if queue.low_water_mark > queue.high_water_mark {
            return Err(ConfigError::invalid_value(
                "work_queue.low_water_mark",
                format!(
                    "{} exceeds high_water_mark {}",
                    queue.low_water_mark, queue.high_water_mark
                ),
            ));
        }
        if queue.dequeue_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "work_queue.dequeue_timeout_ms",
                "must be greater than zero",
            ));
        }

        if self.logging.enabled {
            waypoint_telemetry::logging::create_env_filter(&self.logging.level)
                .map_err(|e| ConfigError::invalid_value("logging.level", e.to_string()))?;
        }

        Ok(())
    }

    /// Development preset: pretty, coloured debug logs.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.ansi_enabled = true;
        config
    }

    /// Production preset: JSON info logs with metrics.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config.logging.ansi_enabled = false;
        config.metrics.enabled = true;
        config
    }

    /// Builds the phase manager described by `[phases]`.
    pub fn phase_manager(&self) -> Result<PhaseManager, ConfigError> {
        self.phases.to_phase_manager()
    }

    /// Telemetry settings for [`waypoint_telemetry::init_telemetry`].
    #[must_use]
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            logging: self.logging.to_log_config(),
            metrics: self.metrics.to_metrics_config(),
        }
    }
}

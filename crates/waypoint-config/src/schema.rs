//! Configuration schema types.
//!
//! One struct per TOML section. Every section rejects unknown keys and fills
//! missing keys from its defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use waypoint_core::{PhaseManager, PhaseRegistry};
use waypoint_telemetry::{LogConfig, MetricsConfig};
use waypoint_workqueue::WorkQueueConfig;

use crate::ConfigError;

/// One phase in a configured phase list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PhaseEntry {
    /// Phase name.
    pub name: String,

    /// Sort key; must strictly increase along the list.
    pub priority: i32,
}

impl PhaseEntry {
    /// Creates an entry.
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }
}

/// Phase lists for the bus.
///
/// An absent list keeps the built-in default for that direction; a present
/// list replaces it entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct PhasesConfig {
    /// Inbound phases, in order.
    #[serde(default)]
    pub inbound: Option<Vec<PhaseEntry>>,

    /// Outbound phases, in order.
    #[serde(default)]
    pub outbound: Option<Vec<PhaseEntry>>,
}

impl PhasesConfig {
    /// Builds the phase manager, falling back to the defaults per direction.
    pub fn to_phase_manager(&self) -> Result<PhaseManager, ConfigError> {
        let inbound = build_registry("inbound", self.inbound.as_deref())?
            .unwrap_or_else(PhaseRegistry::default_inbound);
        let outbound = build_registry("outbound", self.outbound.as_deref())?
            .unwrap_or_else(PhaseRegistry::default_outbound);
        Ok(PhaseManager::new(inbound, outbound))
    }
}

fn build_registry(
    direction: &'static str,
    entries: Option<&[PhaseEntry]>,
) -> Result<Option<PhaseRegistry>, ConfigError> {
    let Some(entries) = entries else {
        return Ok(None);
    };
    if entries.is_empty() {
        return Err(ConfigError::invalid_value(
            format!("phases.{direction}"),
            "must list at least one phase",
        ));
    }
    PhaseRegistry::from_phases(entries.iter().map(|e| (e.name.clone(), e.priority)))
        .map(Some)
        .map_err(|source| ConfigError::Phases { direction, source })
}

/// Automatic work queue settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WorkQueueSection {
    /// Queue name.
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// Tasks that may wait for a worker.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Maximum concurrent workers.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Workers kept warm.
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,

    /// How long a queued task waits for a worker, in milliseconds.
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
}

impl Default for WorkQueueSection {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            max_queue_size: default_max_queue_size(),
            high_water_mark: default_high_water_mark(),
            low_water_mark: default_low_water_mark(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
        }
    }
}

impl WorkQueueSection {
    /// Converts to the work queue's own config type.
    #[must_use]
    pub fn to_work_queue_config(&self) -> WorkQueueConfig {
        WorkQueueConfig::new(self.name.clone())
            .with_max_queue_size(self.max_queue_size)
            .with_high_water_mark(self.high_water_mark)
            .with_low_water_mark(self.low_water_mark)
            .with_dequeue_timeout(Duration::from_millis(self.dequeue_timeout_ms))
    }
}

fn default_queue_name() -> String {
    waypoint_workqueue::DEFAULT_QUEUE.to_string()
}

fn default_max_queue_size() -> usize {
    256
}

fn default_high_water_mark() -> usize {
    25
}

fn default_low_water_mark() -> usize {
    5
}

fn default_dequeue_timeout_ms() -> u64 {
    120_000
}

/// Dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct DispatchSection {
    /// Keep one-way processing on the receiving task instead of handing it
    /// to the automatic work queue.
    #[serde(default)]
    pub oneway_use_original_thread: bool,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON lines.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive (e.g., "info", "waypoint_chain=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Emit ANSI colours in pretty output.
    #[serde(default)]
    pub ansi_enabled: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::Json,
            ansi_enabled: false,
        }
    }
}

impl LoggingSection {
    /// Converts to the telemetry crate's logging config.
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        let base = match self.format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty => LogConfig::development(),
        };
        LogConfig {
            enabled: self.enabled,
            filter: self.level.clone(),
            ansi: self.ansi_enabled,
            ..base
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Install the Prometheus recorder.
    #[serde(default)]
    pub enabled: bool,
}

impl MetricsSection {
    /// Converts to the telemetry crate's metrics config.
    #[must_use]
    pub fn to_metrics_config(&self) -> MetricsConfig {
        MetricsConfig {
            enabled: self.enabled,
            ..MetricsConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_telemetry::logging::LogOutput;

    #[test]
    fn test_work_queue_defaults() {
        let section = WorkQueueSection::default();
        assert_eq!(section.max_queue_size, 256);
        assert_eq!(section.high_water_mark, 25);
        assert_eq!(section.low_water_mark, 5);
        assert_eq!(section.dequeue_timeout_ms, 120_000);

        let config = section.to_work_queue_config();
        assert_eq!(config.dequeue_timeout, Duration::from_secs(120));
        assert_eq!(config.name, "default");
    }

    #[test]
    fn test_absent_phases_use_defaults() {
        let manager = PhasesConfig::default().to_phase_manager().unwrap();
        assert_eq!(manager.inbound().len(), 15);
        assert_eq!(manager.outbound().len(), 15);
    }

    #[test]
    fn test_custom_inbound_phases() {
        let phases = PhasesConfig {
            inbound: Some(vec![
                PhaseEntry::new("receive", 0),
                PhaseEntry::new("decode", 5),
                PhaseEntry::new("invoke", 9),
            ]),
            outbound: None,
        };
        let manager = phases.to_phase_manager().unwrap();
        assert_eq!(manager.inbound().len(), 3);
        assert_eq!(manager.inbound().position("decode"), Some(1));
        assert_eq!(manager.outbound().len(), 15);
    }

    #[test]
    fn test_duplicate_phase_rejected() {
        let phases = PhasesConfig {
            inbound: Some(vec![PhaseEntry::new("a", 0), PhaseEntry::new("a", 1)]),
            outbound: None,
        };
        assert!(matches!(
            phases.to_phase_manager(),
            Err(ConfigError::Phases {
                direction: "inbound",
                ..
            })
        ));
    }

    #[test]
    fn test_non_increasing_priority_rejected() {
        let phases = PhasesConfig {
            inbound: None,
            outbound: Some(vec![PhaseEntry::new("a", 5), PhaseEntry::new("b", 5)]),
        };
        assert!(matches!(
            phases.to_phase_manager(),
            Err(ConfigError::Phases {
                direction: "outbound",
                ..
            })
        ));
    }

    #[test]
    fn test_empty_phase_list_rejected() {
        let phases = PhasesConfig {
            inbound: Some(Vec::new()),
            outbound: None,
        };
        assert!(matches!(
            phases.to_phase_manager(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_logging_conversion() {
        let pretty = LoggingSection {
            format: LogFormat::Pretty,
            ansi_enabled: true,
            ..LoggingSection::default()
        };
        let config = pretty.to_log_config();
        assert_eq!(config.output, LogOutput::Pretty);
        assert!(config.ansi);
        assert_eq!(config.filter, "info");

        assert_eq!(
            LoggingSection::default().to_log_config().output,
            LogOutput::Json
        );
    }

    #[test]
    fn test_metrics_conversion() {
        let config = MetricsSection { enabled: true }.to_metrics_config();
        assert!(config.enabled);
        assert!(!config.duration_buckets.is_empty());
    }
}

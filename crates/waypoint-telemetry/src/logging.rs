//! Structured logging for Waypoint.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and a single
//! fmt layer, JSON for production or pretty for development. Chains and work
//! queues log through `tracing` macros using the field names in [`fields`].
//!
//! # Example
//!
//! ```rust,ignore
//! use waypoint_telemetry::logging::{LogConfig, init_logging};
//!
//! init_logging(&LogConfig::development())?;
//! tracing::info!(interceptor = "audit", phase = "pre-invoke", "Interceptor added");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Shape of each log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    /// One JSON object per event.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Filter directive, e.g. `info` or `waypoint_chain=debug,warn`.
    pub filter: String,

    /// Line format.
    pub output: LogOutput,

    /// Emit ANSI colour codes. Ignored for JSON output.
    pub ansi: bool,

    /// Include source file and line of each event.
    pub source_location: bool,

    /// Log chain spans opening and closing.
    pub span_events: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Pretty output at debug level with source locations.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            filter: "debug".to_string(),
            output: LogOutput::Pretty,
            ansi: true,
            source_location: true,
            span_events: true,
        }
    }

    /// JSON output at info level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            filter: "info".to_string(),
            output: LogOutput::Json,
            ansi: false,
            source_location: false,
            span_events: false,
        }
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Builds the fmt layer for `config` without installing it.
pub fn fmt_layer(config: &LogConfig) -> TelemetryResult<Box<dyn Layer<Registry> + Send + Sync>> {
    let filter = create_env_filter(&config.filter)?;
    let layer = tracing_subscriber::fmt::layer()
        .with_span_events(config.span_events())
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_thread_ids(true);

    Ok(match config.output {
        LogOutput::Json => layer.json().with_filter(filter).boxed(),
        LogOutput::Pretty => layer
            .pretty()
            .with_ansi(config.ansi)
            .with_filter(filter)
            .boxed(),
    })
}

/// Installs the global subscriber.
///
/// Does nothing when logging is disabled. Fails if the filter directive is
/// invalid or a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(fmt_layer(config)?)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

/// Parses a filter directive.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log filter '{filter}': {e}")))
}

/// Field names shared by chain and work-queue log events.
pub mod fields {
    /// Message id.
    pub const MESSAGE_ID: &str = "message_id";

    /// Exchange id.
    pub const EXCHANGE_ID: &str = "exchange_id";

    /// Chain id.
    pub const CHAIN_ID: &str = "chain_id";

    /// Interceptor id.
    pub const INTERCEPTOR: &str = "interceptor";

    /// Phase name.
    pub const PHASE: &str = "phase";

    /// Fault text.
    pub const FAULT: &str = "fault";

    /// Fault mode.
    pub const FAULT_MODE: &str = "fault_mode";

    /// Work queue name.
    pub const WORK_QUEUE: &str = "work_queue";

    /// Task id.
    pub const TASK_ID: &str = "task_id";
}

//! # Waypoint
//!
//! **Phased interceptor pipeline for message-processing runtimes**
//!
//! Waypoint runs each request through a chain of interceptors ordered by
//! phase. A chain can be paused by one task and resumed by another, can take
//! new interceptors while it runs, and unwinds in reverse when an interceptor
//! faults before handing the message to a dedicated fault chain.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use waypoint::prelude::*;
//!
//! let config = ConfigLoader::new().with_defaults().with_env_prefix("WAYPOINT").load()?;
//! init_telemetry(&config.telemetry())?;
//!
//! let bus = waypoint::bootstrap(&config)?;
//! let endpoint = Arc::new(
//!     Endpoint::builder("orders")
//!         .data_binding(Arc::new(JsonDataBinding))
//!         .invoker(Arc::new(OrderService))
//!         .server_stages()
//!         .build(),
//! );
//!
//! let initiator = ChainInitiator::new(bus, endpoint).with_destination(destination);
//! let outcome = initiator.on_message(message).await?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! transport -> ChainInitiator -> inbound chain ----------> OutgoingChain -> outbound chain
//!                                     |  fault                                 |  fault
//!                                     v                                        v
//!                           unwind in reverse -> FaultChainInitiator -> fault chain
//! ```

#![doc(html_root_url = "https://docs.rs/waypoint/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::info;

// Re-export core types
pub use waypoint_core as core;

// Re-export chain types
pub use waypoint_chain as chain;

// Re-export work queues
pub use waypoint_workqueue as workqueue;

// Re-export configuration
pub use waypoint_config as config;

// Re-export telemetry
pub use waypoint_telemetry as telemetry;

use waypoint_chain::stages::USE_ORIGINAL_THREAD;
use waypoint_chain::Bus;
use waypoint_config::{ConfigError, WaypointConfig};
use waypoint_workqueue::WorkQueueManager;

/// Builds a [`Bus`] from configuration.
///
/// The bus gets the configured phases, an automatic work queue sized from
/// `[work_queue]`, and the `[dispatch]` settings as bus properties. Telemetry
/// is left to the caller.
pub fn bootstrap(config: &WaypointConfig) -> Result<Arc<Bus>, ConfigError> {
    config.validate()?;

    let phases = config.phase_manager()?;
    let work_queues =
        WorkQueueManager::with_automatic(config.work_queue.to_work_queue_config())
            .map_err(|e| ConfigError::invalid_value("work_queue", e.to_string()))?;

    let bus = Bus::builder()
        .phases(phases)
        .work_queues(Arc::new(work_queues))
        .property(
            USE_ORIGINAL_THREAD,
            config.dispatch.oneway_use_original_thread,
        )
        .build();

    info!(
        inbound_phases = bus.phases().inbound().len(),
        outbound_phases = bus.phases().outbound().len(),
        high_water_mark = config.work_queue.high_water_mark,
        oneway_use_original_thread = config.dispatch.oneway_use_original_thread,
        "Waypoint bus ready"
    );
    Ok(Arc::new(bus))
}

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use waypoint::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    pub use waypoint_core::phase::names as phases;
    pub use waypoint_core::{
        BoxFuture, ChainError, ChainOutcome, ChainState, Exchange, Fault, FaultCode, FaultMode,
        FnInterceptor, Interceptor, InterceptorChain, InterceptorMeta, Message, MessageRole,
        PhaseManager, PhaseRegistry,
    };

    pub use waypoint_chain::{
        Bus, ChainInitiator, Conduit, Destination, Endpoint, FaultChainInitiator, Flow,
        FnInvoker, Invoker, JsonDataBinding, LocalDestination, PhaseInterceptorChain, Scope,
    };

    pub use waypoint_workqueue::{WorkQueue, WorkQueueConfig, WorkQueueManager};

    pub use waypoint_config::{ConfigLoader, WaypointConfig};

    pub use waypoint_telemetry::{init_telemetry, TelemetryConfig};
}

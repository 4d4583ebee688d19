//! # Waypoint Chain
//!
//! The phased interceptor chain and everything that assembles and drives it.
//!
//! ## Overview
//!
//! - [`PhaseInterceptorChain`] - linearized interceptors plus an index cursor;
//!   supports pause/resume across tasks, mid-flight additions and fault unwind
//! - [`InterceptorRegistry`] / [`assemble`] - contributions by scope and flow,
//!   merged in a fixed precedence
//! - [`Bus`] / [`Endpoint`] - process-wide and per-service configuration
//! - [`ChainCache`] - linearized templates per endpoint identity and flow
//! - [`ChainInitiator`] - starts the inbound chain for a transport
//! - [`FaultChainInitiator`] - runs the fault chain when a chain aborts
//! - [`stages`] - built-in one-way, invocation, marshalling and send stages
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use waypoint_chain::{Bus, ChainInitiator, Endpoint, JsonDataBinding, LocalDestination};
//!
//! let bus = Arc::new(Bus::new());
//! let endpoint = Arc::new(
//!     Endpoint::builder("orders")
//!         .data_binding(Arc::new(JsonDataBinding))
//!         .invoker(Arc::new(OrderService))
//!         .server_stages()
//!         .build(),
//! );
//!
//! let initiator = ChainInitiator::new(bus, endpoint)
//!     .with_destination(Arc::new(LocalDestination::new()));
//! let outcome = initiator.on_message(message).await?;
//! ```

#![doc(html_root_url = "https://docs.rs/waypoint-chain/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod bus;
pub mod cache;
pub mod chain;
pub mod databinding;
pub mod endpoint;
pub mod fault_observer;
pub mod initiator;
pub mod linearize;
pub mod registry;
pub mod stages;
pub mod transport;

pub use bus::{Bus, BusBuilder};
pub use cache::{ChainCache, ChainTemplate, TemplateKey};
pub use chain::{ChainId, PhaseInterceptorChain};
pub use databinding::{DataBinding, DataReader, DataWriter, JsonDataBinding};
pub use endpoint::{Endpoint, EndpointBuilder, EndpointId, FnInvoker, Invoker};
pub use fault_observer::{FaultChainInitiator, FaultDirection};
pub use initiator::ChainInitiator;
pub use linearize::linearize;
pub use registry::{assemble, Flow, InterceptorRegistry, Scope};
pub use transport::{
    back_channel_for, Conduit, Destination, LocalConduit, LocalDestination, Sent, ACCEPTED,
    RESPONSE_CODE,
};

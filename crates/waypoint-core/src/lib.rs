//! # Waypoint Core
//!
//! Core types and traits for the Waypoint phased interceptor pipeline.
//!
//! This crate provides the foundational types used throughout Waypoint:
//!
//! - [`PhaseRegistry`] / [`PhaseManager`] - Ordered processing stages
//! - [`Interceptor`] / [`InterceptorMeta`] - Units of work bound to one phase
//! - [`Message`] / [`Exchange`] - Per-request state every interceptor touches
//! - [`Fault`] / [`FaultMode`] - Recoverable errors that unwind a chain
//! - [`InterceptorChain`] - What interceptors can ask of the chain driving them
//! - [`ConfigurationError`] / [`ChainError`] - Assembly and state-machine errors

#![doc(html_root_url = "https://docs.rs/waypoint-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod chain;
mod error;
mod exchange;
mod fault;
pub mod fixtures;
mod interceptor;
mod message;
pub mod phase;

pub use chain::{ChainOutcome, ChainState, FaultListener, FaultObserver, InterceptorChain};
pub use error::{ChainError, ChainResult, ConfigurationError};
pub use exchange::{Exchange, ExchangeId, Leg};
pub use fault::{Fault, FaultCode, FaultDescriptor, FaultMode};
pub use interceptor::{BoxFuture, FnInterceptor, Interceptor, InterceptorMeta};
pub use message::{Message, MessageId, MessageRole};
pub use phase::{Phase, PhaseManager, PhaseRegistry};

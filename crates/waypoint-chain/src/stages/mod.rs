//! Built-in interceptors.
//!
//! | Stage | Phase | Flow |
//! |-------|-------|------|
//! | [`DataBindingInInterceptor`] | unmarshal | in |
//! | [`OneWayProcessorInterceptor`] | pre-logical | in |
//! | [`ServiceInvokerInterceptor`] | invoke | in |
//! | [`OutgoingChainInterceptor`] | post-invoke | in |
//! | [`MessageSenderInterceptor`] | prepare-send | out, out-fault |
//! | [`DataBindingOutInterceptor`] | marshal | out |
//! | [`FaultOutInterceptor`] | marshal | out-fault |
//! | [`MessageSenderEndingInterceptor`] | prepare-send-ending | added mid-flight |

pub mod databinding;
pub mod invoker;
pub mod one_way;
pub mod outgoing;
pub mod sender;

pub use databinding::{DataBindingInInterceptor, DataBindingOutInterceptor, FaultOutInterceptor};
pub use invoker::{CurrentExecutor, InvocationResult, ServiceInvokerInterceptor};
pub use one_way::{OneWayProcessorInterceptor, ONE_WAY_PROCESSED, USE_ORIGINAL_THREAD};
pub use outgoing::OutgoingChainInterceptor;
pub use sender::{MessageSenderEndingInterceptor, MessageSenderInterceptor};

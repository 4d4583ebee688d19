//! The chain contract seen by interceptors.
//!
//! Interceptors reach the chain driving them through
//! [`Message::interceptor_chain`] and use this trait to pause, suspend, add
//! interceptors mid-flight or abort. The concrete phased implementation lives
//! in `waypoint-chain`.

use crate::error::{ChainError, ConfigurationError};
use crate::fault::Fault;
use crate::interceptor::{BoxFuture, Interceptor};
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Execution state of a chain.
///
/// ```text
/// Idle -> Running -> { Paused, Complete, Aborted }
/// Paused -> Running
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// Assembled, not started.
    #[default]
    Idle,
    /// An interceptor is executing.
    Running,
    /// Waiting for `resume()`.
    Paused,
    /// Every interceptor ran.
    Complete,
    /// Stopped by a fault or by `abort()`.
    Aborted,
}

impl ChainState {
    /// Returns true for `Complete` and `Aborted`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// What a call to `do_intercept` or `resume` ended with.
#[derive(Debug)]
pub enum ChainOutcome {
    /// The last interceptor returned.
    Complete(Message),
    /// An interceptor paused the chain; the message is parked until `resume()`.
    Paused,
    /// The chain was already being driven elsewhere and continued there.
    Delegated,
    /// A fault or `abort()` stopped the chain.
    Aborted {
        /// The message that was being processed, carrying the exception if any.
        message: Message,
        /// The fault message produced by the fault observer, if one ran.
        fault_message: Option<Message>,
    },
}

impl ChainOutcome {
    /// Returns true if the chain ran to completion.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Returns true if the chain is parked.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Returns true if the chain was aborted.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Returns the fault carried by an aborted outcome.
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Self::Aborted { message, .. } => message.fault(),
            _ => None,
        }
    }

    /// Converts the outcome into what a synchronous caller sees.
    ///
    /// A completed chain yields its message; a faulted chain yields the fault.
    /// A chain aborted without a fault still yields its message. Paused or
    /// delegated chains yield `None`.
    pub fn into_result(self) -> Result<Option<Message>, Fault> {
        match self {
            Self::Complete(message) => Ok(Some(message)),
            Self::Paused | Self::Delegated => Ok(None),
            Self::Aborted { mut message, .. } => match message.take_exception() {
                Some(error) => Err(Fault::from_error(error)),
                None => Ok(Some(message)),
            },
        }
    }
}

/// Receives a message whose chain aborted on a fault.
///
/// The fault-chain initiator is the standard implementation. It returns the
/// fault message it dispatched, if any. An `Err` means fault processing itself
/// failed and is surfaced unchanged to the caller.
pub trait FaultObserver: Send + Sync {
    /// Handles the faulted message.
    fn on_fault<'a>(
        &'a self,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<Option<Message>, ChainError>>;
}

/// Notified when a chain catches a fault, before the default log line.
///
/// Install one as `Arc<dyn FaultListener>` content on the message or as an
/// exchange extension. Returning `false` suppresses the default logging.
pub trait FaultListener: Send + Sync {
    /// Called once per caught fault.
    fn fault_occurred(&self, fault: &Fault, description: &str, message: &Message) -> bool;
}

/// The chain operations available to interceptors and callers.
///
/// All methods take `&self`; implementations synchronise internally so that
/// one task can pause and another resume.
pub trait InterceptorChain: Send + Sync {
    /// Returns the current state.
    fn state(&self) -> ChainState;

    /// Adds an interceptor unless one with the same id is already present.
    fn add(&self, interceptor: Arc<dyn Interceptor>) -> Result<(), ConfigurationError> {
        self.add_forced(interceptor, false)
    }

    /// Adds an interceptor; with `force` duplicates by id are allowed.
    ///
    /// Added interceptors are merged into the unexecuted remainder only.
    fn add_forced(
        &self,
        interceptor: Arc<dyn Interceptor>,
        force: bool,
    ) -> Result<(), ConfigurationError>;

    /// Pauses after the current interceptor returns.
    fn pause(&self) -> Result<(), ChainError>;

    /// Pauses so that the current interceptor runs again on resume.
    fn suspend(&self) -> Result<(), ChainError>;

    /// Cancels a pause that has not taken effect yet.
    fn unpause(&self);

    /// Stops forward iteration after the current interceptor, without unwinding.
    fn abort(&self);

    /// Continues a paused chain on the calling task.
    fn resume(self: Arc<Self>) -> BoxFuture<'static, Result<ChainOutcome, ChainError>>;

    /// Returns the fault observer.
    fn fault_observer(&self) -> Option<Arc<dyn FaultObserver>>;

    /// Replaces the fault observer.
    fn set_fault_observer(&self, observer: Option<Arc<dyn FaultObserver>>);

    /// Ids of all interceptors in execution order.
    fn iter_ids(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ChainState::Idle.to_string(), "idle");
        assert_eq!(ChainState::Paused.to_string(), "paused");
        assert!(ChainState::Aborted.is_terminal());
        assert!(!ChainState::Running.is_terminal());
    }

    #[test]
    fn test_outcome_into_result() {
        let outcome = ChainOutcome::Complete(Message::inbound());
        assert!(outcome.is_complete());
        assert!(outcome.into_result().unwrap().is_some());

        assert!(ChainOutcome::Paused.into_result().unwrap().is_none());

        let mut message = Message::inbound();
        message.set_exception(Fault::server("boom"));
        let outcome = ChainOutcome::Aborted {
            message,
            fault_message: None,
        };
        assert_eq!(outcome.fault().map(Fault::message), Some("boom"));
        assert_eq!(outcome.into_result().unwrap_err().message(), "boom");
    }

    #[test]
    fn test_aborted_without_fault_keeps_message() {
        let outcome = ChainOutcome::Aborted {
            message: Message::inbound(),
            fault_message: None,
        };
        assert!(outcome.is_aborted());
        assert!(outcome.into_result().unwrap().is_some());
    }
}

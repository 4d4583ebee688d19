//! Error types for chain assembly and execution.
//!
//! Waypoint separates three kinds of failure:
//!
//! | Kind | Type | Recovery |
//! |------|------|----------|
//! | Protocol/application error raised by an interceptor | [`Fault`](crate::Fault) | Chain unwinds and a fault chain runs |
//! | Bad phase reference, unsatisfiable ordering | [`ConfigurationError`] | None, fails chain assembly |
//! | Misuse of the chain state machine, fault-of-fault | [`ChainError`] | None, surfaced to the caller |

use crate::chain::ChainState;
use crate::fault::Fault;
use thiserror::Error;

/// Result type alias for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors raised while building a phase registry or linearizing interceptors.
///
/// These are fatal: they are reported once when a chain is assembled and are
/// never retried per request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// An interceptor references a phase that is not registered.
    #[error("interceptor '{interceptor}' declares unknown phase '{phase}'")]
    UnknownPhase {
        /// Id of the offending interceptor.
        interceptor: String,
        /// The phase it asked for.
        phase: String,
    },

    /// A phase name was registered twice.
    #[error("phase '{0}' is already registered")]
    DuplicatePhase(String),

    /// A phase was registered with a priority that does not follow the previous one.
    #[error("phase '{phase}' has priority {priority}, which must exceed {previous}")]
    NonMonotonicPriority {
        /// Phase being registered.
        phase: String,
        /// Priority it was given.
        priority: i32,
        /// Priority of the last registered phase.
        previous: i32,
    },

    /// A phase was looked up that does not exist.
    #[error("phase '{0}' is not registered")]
    PhaseNotFound(String),

    /// Before/after constraints inside a phase form a cycle.
    #[error("ordering cycle in phase '{phase}' between {interceptors:?}")]
    OrderingCycle {
        /// Phase containing the cycle.
        phase: String,
        /// Interceptors left unordered once the cycle was detected.
        interceptors: Vec<String>,
    },
}

/// Errors raised by the chain state machine itself.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Invalid chain configuration.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// `resume()` was called on a chain that is not paused.
    #[error("chain is not paused (state: {0})")]
    NotPaused(ChainState),

    /// An operation was attempted from a state that does not allow it.
    #[error("operation '{operation}' is not allowed in state {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the chain was in.
        state: ChainState,
    },

    /// `do_intercept_starting_at/after` named an interceptor not in the chain.
    #[error("interceptor '{0}' is not part of this chain")]
    InterceptorNotFound(String),

    /// The fault chain itself failed. There is no further recovery layer.
    #[error("fault processing failed: {message}")]
    FaultProcessing {
        /// Description of what failed.
        message: String,
        /// The fault raised inside the fault chain.
        #[source]
        fault: Fault,
    },
}

impl ChainError {
    /// Creates an invalid state error.
    #[must_use]
    pub const fn invalid_state(operation: &'static str, state: ChainState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Creates a fault processing error.
    #[must_use]
    pub fn fault_processing(message: impl Into<String>, fault: Fault) -> Self {
        Self::FaultProcessing {
            message: message.into(),
            fault,
        }
    }

    /// Returns true if this error stems from configuration rather than runtime state.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_phase_display() {
        let err = ConfigurationError::UnknownPhase {
            interceptor: "logging".to_string(),
            phase: "nowhere".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("logging"));
        assert!(text.contains("nowhere"));
    }

    #[test]
    fn test_cycle_display() {
        let err = ConfigurationError::OrderingCycle {
            phase: "unmarshal".to_string(),
            interceptors: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().contains("unmarshal"));
    }

    #[test]
    fn test_configuration_conversion() {
        let err: ChainError = ConfigurationError::DuplicatePhase("receive".to_string()).into();
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "phase 'receive' is already registered");
    }

    #[test]
    fn test_not_paused_display() {
        let err = ChainError::NotPaused(ChainState::Complete);
        assert_eq!(err.to_string(), "chain is not paused (state: complete)");
    }

    #[test]
    fn test_fault_processing_source() {
        use std::error::Error as _;

        let err = ChainError::fault_processing("out-fault chain aborted", Fault::server("boom"));
        assert!(err.source().is_some());
        assert!(!err.is_configuration());
    }
}

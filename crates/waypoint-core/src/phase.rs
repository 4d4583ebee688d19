//! Phases and the phase registry.
//!
//! A [`Phase`] is a named stage in message processing. Phases are totally
//! ordered by priority; every interceptor belongs to exactly one phase and the
//! chain runs phases in registry order.
//!
//! The set of phases is configured once at startup and never changes while
//! messages are in flight. [`PhaseManager`] holds the inbound and outbound
//! registries that chains (including fault chains) are built against.
//!
//! # Example
//!
//! ```
//! use waypoint_core::phase::PhaseRegistry;
//! use std::cmp::Ordering;
//!
//! let mut registry = PhaseRegistry::new();
//! registry.register("receive", 0).unwrap();
//! registry.register("invoke", 10).unwrap();
//!
//! assert_eq!(registry.compare("receive", "invoke").unwrap(), Ordering::Less);
//! assert!(registry.register("receive", 20).is_err());
//! ```

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Well-known phase names.
///
/// The inbound list runs from transport receipt to service invocation, the
/// outbound list from response setup to transport send.
pub mod names {
    /// Transport has handed over raw bytes.
    pub const RECEIVE: &str = "receive";
    /// Before stream wrapping.
    pub const PRE_STREAM: &str = "pre-stream";
    /// User stream interceptors.
    pub const USER_STREAM: &str = "user-stream";
    /// After stream wrapping.
    pub const POST_STREAM: &str = "post-stream";
    /// Structured reader creation.
    pub const READ: &str = "read";
    /// Before protocol processing.
    pub const PRE_PROTOCOL: &str = "pre-protocol";
    /// User protocol interceptors.
    pub const USER_PROTOCOL: &str = "user-protocol";
    /// After protocol processing.
    pub const POST_PROTOCOL: &str = "post-protocol";
    /// Payload is mapped to domain values.
    pub const UNMARSHAL: &str = "unmarshal";
    /// Before logical handlers.
    pub const PRE_LOGICAL: &str = "pre-logical";
    /// User logical handlers.
    pub const USER_LOGICAL: &str = "user-logical";
    /// After logical handlers.
    pub const POST_LOGICAL: &str = "post-logical";
    /// Before invocation.
    pub const PRE_INVOKE: &str = "pre-invoke";
    /// Service invocation.
    pub const INVOKE: &str = "invoke";
    /// After invocation.
    pub const POST_INVOKE: &str = "post-invoke";

    /// Outbound setup.
    pub const SETUP: &str = "setup";
    /// Back-channel or conduit is prepared.
    pub const PREPARE_SEND: &str = "prepare-send";
    /// Structured writer creation.
    pub const WRITE: &str = "write";
    /// Domain values are mapped to payload.
    pub const MARSHAL: &str = "marshal";
    /// Bytes are handed to the transport.
    pub const SEND: &str = "send";
    /// Closes what [`PREPARE_SEND`] opened.
    pub const PREPARE_SEND_ENDING: &str = "prepare-send-ending";
}

/// A named processing stage with a priority establishing total order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Phase {
    name: String,
    priority: i32,
}

impl Phase {
    /// Creates a new phase.
    #[must_use]
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }

    /// Returns the phase name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the phase priority.
    #[must_use]
    pub const fn priority(&self) -> i32 {
        self.priority
    }
}

impl PartialOrd for Phase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Phase {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.priority)
    }
}

/// An ordered, append-only list of phases.
///
/// Priorities must strictly increase in registration order and names must be
/// unique, so the registration order and the priority order always agree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseRegistry {
    phases: Vec<Phase>,
    index: HashMap<String, usize>,
}

impl PhaseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from `(name, priority)` pairs in order.
    pub fn from_phases<I, S>(phases: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (S, i32)>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for (name, priority) in phases {
            registry.register(name, priority)?;
        }
        Ok(registry)
    }

    /// Builds a registry from names, assigning priorities in steps of ten.
    pub fn from_names<I, S>(names: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for (i, name) in names.into_iter().enumerate() {
            let priority = i32::try_from(i).unwrap_or(i32::MAX / 10) * 10;
            registry.register(name, priority)?;
        }
        Ok(registry)
    }

    /// Registers a phase at the end of the order.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        priority: i32,
    ) -> Result<(), ConfigurationError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(ConfigurationError::DuplicatePhase(name));
        }
        if let Some(last) = self.phases.last() {
            if priority <= last.priority {
                return Err(ConfigurationError::NonMonotonicPriority {
                    phase: name,
                    priority,
                    previous: last.priority,
                });
            }
        }
        self.index.insert(name.clone(), self.phases.len());
        self.phases.push(Phase::new(name, priority));
        Ok(())
    }

    /// Returns all phases in order.
    #[must_use]
    pub fn order(&self) -> &[Phase] {
        &self.phases
    }

    /// Looks up a phase by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Phase> {
        self.index.get(name).map(|&i| &self.phases[i])
    }

    /// Returns the zero-based rank of a phase.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Returns true if the phase is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Compares two registered phases.
    pub fn compare(&self, a: &str, b: &str) -> Result<Ordering, ConfigurationError> {
        let pa = self
            .position(a)
            .ok_or_else(|| ConfigurationError::PhaseNotFound(a.to_string()))?;
        let pb = self
            .position(b)
            .ok_or_else(|| ConfigurationError::PhaseNotFound(b.to_string()))?;
        Ok(pa.cmp(&pb))
    }

    /// Returns the number of phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    /// Returns true if no phases are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// The default inbound phases, from receipt to invocation.
    #[must_use]
    pub fn default_inbound() -> Self {
        use names::*;
        Self::from_names([
            RECEIVE,
            PRE_STREAM,
            USER_STREAM,
            POST_STREAM,
            READ,
            PRE_PROTOCOL,
            USER_PROTOCOL,
            POST_PROTOCOL,
            UNMARSHAL,
            PRE_LOGICAL,
            USER_LOGICAL,
            POST_LOGICAL,
            PRE_INVOKE,
            INVOKE,
            POST_INVOKE,
        ])
        .unwrap_or_default()
    }

    /// The default outbound phases, from setup to send.
    #[must_use]
    pub fn default_outbound() -> Self {
        use names::*;
        Self::from_names([
            SETUP,
            PRE_LOGICAL,
            USER_LOGICAL,
            POST_LOGICAL,
            PREPARE_SEND,
            PRE_STREAM,
            PRE_PROTOCOL,
            WRITE,
            MARSHAL,
            USER_PROTOCOL,
            POST_PROTOCOL,
            USER_STREAM,
            POST_STREAM,
            SEND,
            PREPARE_SEND_ENDING,
        ])
        .unwrap_or_default()
    }
}

/// Holds the inbound and outbound phase registries for a bus.
///
/// Inbound fault chains run over the inbound phases and outbound fault chains
/// over the outbound phases.
#[derive(Debug, Clone)]
pub struct PhaseManager {
    inbound: Arc<PhaseRegistry>,
    outbound: Arc<PhaseRegistry>,
}

impl PhaseManager {
    /// Creates a manager from explicit registries.
    #[must_use]
    pub fn new(inbound: PhaseRegistry, outbound: PhaseRegistry) -> Self {
        Self {
            inbound: Arc::new(inbound),
            outbound: Arc::new(outbound),
        }
    }

    /// Returns the inbound registry.
    #[must_use]
    pub fn inbound(&self) -> &Arc<PhaseRegistry> {
        &self.inbound
    }

    /// Returns the outbound registry.
    #[must_use]
    pub fn outbound(&self) -> &Arc<PhaseRegistry> {
        &self.outbound
    }
}

impl Default for PhaseManager {
    fn default() -> Self {
        Self::new(
            PhaseRegistry::default_inbound(),
            PhaseRegistry::default_outbound(),
        )
    }
}

//! Interceptor contributions keyed by scope and flow.
//!
//! Every contributor (bus, client, service, endpoint, binding, data binding)
//! registers plain ordered lists. Chains are assembled by concatenating those
//! lists in an explicit scope precedence and then linearizing the result, so
//! contribution order is the tie-break inside a phase.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use waypoint_core::Interceptor;

/// Who contributed an interceptor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Process-wide interceptors.
    Bus,
    /// Requestor-side interceptors.
    Client,
    /// Interceptors of the logical service.
    Service,
    /// Interceptors of one endpoint.
    Endpoint,
    /// Protocol binding interceptors.
    Binding,
    /// Data binding interceptors.
    DataBinding,
}

impl Scope {
    /// Merge order for normal chains.
    pub const CHAIN_PRECEDENCE: [Self; 6] = [
        Self::Bus,
        Self::Client,
        Self::Endpoint,
        Self::Binding,
        Self::Service,
        Self::DataBinding,
    ];

    /// Merge order for fault chains.
    pub const FAULT_PRECEDENCE: [Self; 6] = [
        Self::Bus,
        Self::Client,
        Self::Service,
        Self::Endpoint,
        Self::Binding,
        Self::DataBinding,
    ];

    /// Returns the scope name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bus => "bus",
            Self::Client => "client",
            Self::Service => "service",
            Self::Endpoint => "endpoint",
            Self::Binding => "binding",
            Self::DataBinding => "data_binding",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which chain a list contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Inbound messages.
    In,
    /// Outbound messages.
    Out,
    /// Inbound fault messages.
    InFault,
    /// Outbound fault messages.
    OutFault,
}

impl Flow {
    /// Returns true for the two fault flows.
    #[must_use]
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::InFault | Self::OutFault)
    }

    /// Returns true if the flow runs over the inbound phases.
    #[must_use]
    pub const fn is_inbound(self) -> bool {
        matches!(self, Self::In | Self::InFault)
    }

    /// The scope merge order for this flow.
    #[must_use]
    pub const fn precedence(self) -> [Scope; 6] {
        if self.is_fault() {
            Scope::FAULT_PRECEDENCE
        } else {
            Scope::CHAIN_PRECEDENCE
        }
    }

    /// Returns the flow name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
            Self::InFault => "in_fault",
            Self::OutFault => "out_fault",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered interceptor lists per `(Scope, Flow)`.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    lists: IndexMap<(Scope, Flow), Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an interceptor to the `(scope, flow)` list.
    pub fn add(&mut self, scope: Scope, flow: Flow, interceptor: Arc<dyn Interceptor>) {
        self.lists.entry((scope, flow)).or_default().push(interceptor);
    }

    /// Appends several interceptors to the `(scope, flow)` list.
    pub fn extend<I>(&mut self, scope: Scope, flow: Flow, interceptors: I)
    where
        I: IntoIterator<Item = Arc<dyn Interceptor>>,
    {
        self.lists
            .entry((scope, flow))
            .or_default()
            .extend(interceptors);
    }

    /// Removes every interceptor with `id` from the `(scope, flow)` list.
    ///
    /// Returns true if anything was removed.
    pub fn remove(&mut self, scope: Scope, flow: Flow, id: &str) -> bool {
        let Some(list) = self.lists.get_mut(&(scope, flow)) else {
            return false;
        };
        let before = list.len();
        list.retain(|interceptor| interceptor.id() != id);
        list.len() != before
    }

    /// The `(scope, flow)` list, in contribution order.
    #[must_use]
    pub fn interceptors(&self, scope: Scope, flow: Flow) -> &[Arc<dyn Interceptor>] {
        self.lists
            .get(&(scope, flow))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Total number of registered interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for ((scope, flow), list) in &self.lists {
            let ids: Vec<&str> = list.iter().map(|interceptor| interceptor.id()).collect();
            map.entry(&format_args!("{scope}/{flow}"), &ids);
        }
        map.finish()
    }
}

/// Concatenates `flow` lists from `sources` in the flow's scope precedence.
///
/// Within one scope, sources contribute in the order given.
#[must_use]
pub fn assemble(flow: Flow, sources: &[&InterceptorRegistry]) -> Vec<Arc<dyn Interceptor>> {
    flow.precedence()
        .iter()
        .flat_map(|scope| {
            sources
                .iter()
                .flat_map(move |registry| registry.interceptors(*scope, flow).iter().cloned())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::fixtures::{self, RecordingInterceptor};

    fn named(id: &str) -> Arc<dyn Interceptor> {
        RecordingInterceptor::new(id, "receive", &fixtures::trace()).shared()
    }

    fn ids(list: &[Arc<dyn Interceptor>]) -> Vec<&str> {
        list.iter().map(|interceptor| interceptor.id()).collect()
    }

    #[test]
    fn test_chain_precedence() {
        let mut bus = InterceptorRegistry::new();
        bus.add(Scope::Bus, Flow::In, named("bus"));

        let mut endpoint = InterceptorRegistry::new();
        endpoint.add(Scope::Service, Flow::In, named("service"));
        endpoint.add(Scope::Binding, Flow::In, named("binding"));
        endpoint.add(Scope::Endpoint, Flow::In, named("endpoint"));
        endpoint.add(Scope::DataBinding, Flow::In, named("data"));

        let list = assemble(Flow::In, &[&bus, &endpoint]);
        assert_eq!(ids(&list), vec!["bus", "endpoint", "binding", "service", "data"]);
    }

    #[test]
    fn test_fault_precedence_puts_service_first() {
        let mut endpoint = InterceptorRegistry::new();
        endpoint.add(Scope::Binding, Flow::OutFault, named("binding"));
        endpoint.add(Scope::Endpoint, Flow::OutFault, named("endpoint"));
        endpoint.add(Scope::Service, Flow::OutFault, named("service"));

        let list = assemble(Flow::OutFault, &[&endpoint]);
        assert_eq!(ids(&list), vec!["service", "endpoint", "binding"]);
    }

    #[test]
    fn test_flows_are_separate() {
        let mut registry = InterceptorRegistry::new();
        registry.add(Scope::Endpoint, Flow::In, named("in"));
        registry.add(Scope::Endpoint, Flow::InFault, named("in-fault"));

        assert_eq!(ids(&assemble(Flow::In, &[&registry])), vec!["in"]);
        assert_eq!(ids(&assemble(Flow::InFault, &[&registry])), vec!["in-fault"]);
        assert!(assemble(Flow::Out, &[&registry]).is_empty());
    }

    #[test]
    fn test_remove() {
        let mut registry = InterceptorRegistry::new();
        registry.extend(Scope::Bus, Flow::Out, [named("a"), named("b")]);

        assert!(registry.remove(Scope::Bus, Flow::Out, "a"));
        assert!(!registry.remove(Scope::Bus, Flow::Out, "a"));
        assert!(!registry.remove(Scope::Client, Flow::Out, "b"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_flow_helpers() {
        assert!(Flow::InFault.is_fault());
        assert!(Flow::InFault.is_inbound());
        assert!(!Flow::Out.is_inbound());
        assert_eq!(Flow::OutFault.to_string(), "out_fault");
        assert_eq!(Scope::DataBinding.to_string(), "data_binding");
    }
}

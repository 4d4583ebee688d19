//! The bus: process-wide phases, interceptors, work queues and chain cache.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};
use waypoint_core::{ConfigurationError, Interceptor, PhaseManager, PhaseRegistry};
use waypoint_workqueue::WorkQueueManager;

use crate::cache::{ChainCache, ChainTemplate, TemplateKey};
use crate::chain::PhaseInterceptorChain;
use crate::endpoint::Endpoint;
use crate::registry::{assemble, Flow, InterceptorRegistry, Scope};

/// Shared runtime for every endpoint.
///
/// Interceptors added to the bus apply to every chain it assembles. Adding
/// one invalidates all cached templates.
pub struct Bus {
    phases: PhaseManager,
    interceptors: RwLock<InterceptorRegistry>,
    work_queues: Arc<WorkQueueManager>,
    cache: ChainCache,
    properties: RwLock<IndexMap<String, Value>>,
}

impl Bus {
    /// Creates a bus with default phases and an empty work-queue manager.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a bus.
    #[must_use]
    pub fn builder() -> BusBuilder {
        BusBuilder::default()
    }

    /// Inbound and outbound phases.
    #[must_use]
    pub const fn phases(&self) -> &PhaseManager {
        &self.phases
    }

    /// Phases a flow runs over.
    #[must_use]
    pub fn phases_for(&self, flow: Flow) -> &Arc<PhaseRegistry> {
        if flow.is_inbound() {
            self.phases.inbound()
        } else {
            self.phases.outbound()
        }
    }

    /// Named work queues.
    #[must_use]
    pub fn work_queues(&self) -> &Arc<WorkQueueManager> {
        &self.work_queues
    }

    /// Template cache.
    #[must_use]
    pub const fn chain_cache(&self) -> &ChainCache {
        &self.cache
    }

    /// Adds a bus-wide interceptor to `flow` and clears the template cache.
    pub fn add_interceptor(&self, flow: Flow, interceptor: Arc<dyn Interceptor>) {
        debug!(interceptor = interceptor.id(), %flow, "Adding bus interceptor");
        self.interceptors.write().add(Scope::Bus, flow, interceptor);
        self.cache.clear();
    }

    /// Removes bus-wide interceptors with `id` from `flow`.
    pub fn remove_interceptor(&self, flow: Flow, id: &str) -> bool {
        let removed = self.interceptors.write().remove(Scope::Bus, flow, id);
        if removed {
            self.cache.clear();
        }
        removed
    }

    /// Bus-wide interceptors for `flow`, in contribution order.
    #[must_use]
    pub fn interceptors(&self, flow: Flow) -> Vec<Arc<dyn Interceptor>> {
        self.interceptors.read().interceptors(Scope::Bus, flow).to_vec()
    }

    /// Returns a bus property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.read().get(key).cloned()
    }

    /// Sets a bus property.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.write().insert(key.into(), value.into());
    }

    /// Snapshot of all bus properties.
    #[must_use]
    pub fn properties(&self) -> IndexMap<String, Value> {
        self.properties.read().clone()
    }

    /// Returns the linearized template for `flow`, building it on first use.
    ///
    /// Contributions are merged bus first, then the endpoint's scopes, in the
    /// flow's scope precedence.
    pub fn chain_template(
        &self,
        flow: Flow,
        endpoint: Option<&Endpoint>,
    ) -> Result<ChainTemplate, ConfigurationError> {
        let key = endpoint.map_or(TemplateKey::Bus, |endpoint| endpoint.id().into());
        self.cache.get_or_build(key, flow, || {
            let interceptors = {
                let bus = self.interceptors.read();
                match endpoint {
                    Some(endpoint) => assemble(flow, &[&*bus, endpoint.interceptors()]),
                    None => assemble(flow, &[&*bus]),
                }
            };
            debug!(endpoint = endpoint.map_or("", Endpoint::name), %flow, count = interceptors.len(), "Linearizing chain template");
            ChainTemplate::build(Arc::clone(self.phases_for(flow)), interceptors)
        })
    }

    /// Creates a fresh chain for `flow`.
    pub fn create_chain(
        &self,
        flow: Flow,
        endpoint: Option<&Endpoint>,
    ) -> Result<PhaseInterceptorChain, ConfigurationError> {
        Ok(self.chain_template(flow, endpoint)?.instantiate())
    }

    /// Shuts down all work queues.
    pub fn shutdown(&self, process_remaining: bool) {
        info!(process_remaining, "Shutting down bus");
        self.work_queues.shutdown_all(process_remaining);
        self.cache.clear();
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("phases", &self.phases)
            .field("interceptors", &*self.interceptors.read())
            .field("work_queues", &self.work_queues.names())
            .field("cached_templates", &self.cache.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Bus`].
#[derive(Default)]
pub struct BusBuilder {
    phases: Option<PhaseManager>,
    interceptors: InterceptorRegistry,
    work_queues: Option<Arc<WorkQueueManager>>,
    properties: IndexMap<String, Value>,
}

impl BusBuilder {
    /// Replaces the default phases.
    pub fn phases(mut self, phases: PhaseManager) -> Self {
        self.phases = Some(phases);
        self
    }

    /// Uses `manager` for work queues.
    pub fn work_queues(mut self, manager: Arc<WorkQueueManager>) -> Self {
        self.work_queues = Some(manager);
        self
    }

    /// Adds a bus-wide interceptor.
    pub fn interceptor(mut self, flow: Flow, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.add(Scope::Bus, flow, interceptor);
        self
    }

    /// Sets a bus property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builds the bus.
    pub fn build(self) -> Bus {
        Bus {
            phases: self.phases.unwrap_or_default(),
            interceptors: RwLock::new(self.interceptors),
            work_queues: self.work_queues.unwrap_or_default(),
            cache: ChainCache::new(),
            properties: RwLock::new(self.properties),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::fixtures::{self, RecordingInterceptor};
    use waypoint_core::phase::names;
    use waypoint_core::InterceptorChain;

    #[test]
    fn test_template_merges_bus_and_endpoint() {
        let trace = fixtures::trace();
        let bus = Bus::builder()
            .interceptor(
                Flow::In,
                RecordingInterceptor::new("bus-invoke", names::INVOKE, &trace).shared(),
            )
            .build();
        let endpoint = Endpoint::builder("orders")
            .interceptor(
                Scope::Endpoint,
                Flow::In,
                RecordingInterceptor::new("ep-receive", names::RECEIVE, &trace).shared(),
            )
            .build();

        let template = bus.chain_template(Flow::In, Some(&endpoint)).unwrap();
        assert_eq!(template.ids(), vec!["ep-receive", "bus-invoke"]);
        assert_eq!(bus.chain_cache().len(), 1);
    }

    #[test]
    fn test_endpoints_sharing_a_name_keep_their_own_templates() {
        let trace = fixtures::trace();
        let bus = Bus::new();
        let first = Endpoint::builder("orders")
            .interceptor(
                Scope::Endpoint,
                Flow::In,
                RecordingInterceptor::new("first-only", names::RECEIVE, &trace).shared(),
            )
            .build();
        let second = Endpoint::builder("orders")
            .interceptor(
                Scope::Endpoint,
                Flow::In,
                RecordingInterceptor::new("second-only", names::RECEIVE, &trace).shared(),
            )
            .build();
        assert_ne!(first.id(), second.id());

        let a = bus.chain_template(Flow::In, Some(&first)).unwrap();
        let b = bus.chain_template(Flow::In, Some(&second)).unwrap();

        assert_eq!(a.ids(), vec!["first-only"]);
        assert_eq!(b.ids(), vec!["second-only"]);
        assert_eq!(bus.chain_cache().len(), 2);

        bus.chain_cache().evict_endpoint(first.id());
        assert_eq!(bus.chain_cache().len(), 1);
    }

    #[test]
    fn test_outbound_flows_use_outbound_phases() {
        let trace = fixtures::trace();
        let bus = Bus::builder()
            .interceptor(
                Flow::OutFault,
                RecordingInterceptor::new("fault-send", names::SEND, &trace).shared(),
            )
            .build();

        let chain = bus.create_chain(Flow::OutFault, None).unwrap();
        assert_eq!(chain.iter_ids(), vec!["fault-send"]);
        assert!(Arc::ptr_eq(
            chain.phases(),
            bus.phases().outbound()
        ));
    }

    #[test]
    fn test_unknown_phase_surfaces_at_assembly() {
        let trace = fixtures::trace();
        // "send" is an outbound phase only.
        let bus = Bus::builder()
            .interceptor(
                Flow::In,
                RecordingInterceptor::new("misplaced", names::SEND, &trace).shared(),
            )
            .build();

        let err = bus.chain_template(Flow::In, None).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownPhase { .. }));
        assert!(bus.chain_cache().is_empty());
    }

    #[test]
    fn test_adding_interceptor_invalidates_cache() {
        let trace = fixtures::trace();
        let bus = Bus::new();
        bus.chain_template(Flow::In, None).unwrap();
        assert_eq!(bus.chain_cache().len(), 1);

        bus.add_interceptor(
            Flow::In,
            RecordingInterceptor::new("late", names::RECEIVE, &trace).shared(),
        );
        assert!(bus.chain_cache().is_empty());
        assert_eq!(bus.chain_template(Flow::In, None).unwrap().ids(), vec!["late"]);

        assert!(bus.remove_interceptor(Flow::In, "late"));
        assert!(bus.chain_template(Flow::In, None).unwrap().is_empty());
    }

    #[test]
    fn test_properties() {
        let bus = Bus::builder().property("region", "eu").build();
        bus.set_property("tier", 2);
        assert_eq!(bus.property("region"), Some(Value::from("eu")));
        assert_eq!(bus.properties().len(), 2);
    }
}

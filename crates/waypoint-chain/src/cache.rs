//! Cached chain linearizations.
//!
//! Linearizing is the expensive part of building a chain, and its result only
//! depends on the contributing registries. A [`ChainTemplate`] keeps the
//! ordered list; every exchange gets a fresh chain instantiated from it.

use std::sync::Arc;

use dashmap::DashMap;
use waypoint_core::{ConfigurationError, Interceptor, PhaseRegistry};

use crate::chain::PhaseInterceptorChain;
use crate::endpoint::EndpointId;
use crate::registry::Flow;

/// An immutable, already linearized interceptor list.
#[derive(Clone)]
pub struct ChainTemplate {
    phases: Arc<PhaseRegistry>,
    entries: Arc<[Arc<dyn Interceptor>]>,
}

impl ChainTemplate {
    pub(crate) fn new(phases: Arc<PhaseRegistry>, entries: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            phases,
            entries: entries.into(),
        }
    }

    /// Linearizes `interceptors` into a template.
    pub fn build(
        phases: Arc<PhaseRegistry>,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Result<Self, ConfigurationError> {
        let entries = crate::linearize::linearize(&phases, interceptors)?;
        Ok(Self::new(phases, entries))
    }

    /// Creates an idle chain with this ordering.
    #[must_use]
    pub fn instantiate(&self) -> PhaseInterceptorChain {
        PhaseInterceptorChain::from_linearized(Arc::clone(&self.phases), self.entries.to_vec())
    }

    /// Interceptor ids in execution order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|interceptor| interceptor.id()).collect()
    }

    /// Number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the template has no interceptors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ChainTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainTemplate")
            .field("interceptors", &self.ids())
            .finish()
    }
}

/// What a template was assembled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKey {
    /// Bus contributions only.
    Bus,
    /// Bus contributions plus one endpoint's scopes.
    Endpoint(EndpointId),
}

impl From<EndpointId> for TemplateKey {
    fn from(id: EndpointId) -> Self {
        Self::Endpoint(id)
    }
}

/// Templates keyed by endpoint identity and flow.
#[derive(Debug, Default)]
pub struct ChainCache {
    templates: DashMap<(TemplateKey, Flow), ChainTemplate>,
}

impl ChainCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached template, building and caching it on a miss.
    pub fn get_or_build<F>(
        &self,
        key: TemplateKey,
        flow: Flow,
        build: F,
    ) -> Result<ChainTemplate, ConfigurationError>
    where
        F: FnOnce() -> Result<ChainTemplate, ConfigurationError>,
    {
        if let Some(template) = self.templates.get(&(key, flow)) {
            return Ok(template.value().clone());
        }
        let template = build()?;
        Ok(self.templates.entry((key, flow)).or_insert(template).value().clone())
    }

    /// Returns the cached template, if any.
    #[must_use]
    pub fn get(&self, key: TemplateKey, flow: Flow) -> Option<ChainTemplate> {
        self.templates
            .get(&(key, flow))
            .map(|entry| entry.value().clone())
    }

    /// Replaces the template for `key` and `flow`.
    pub fn insert(&self, key: TemplateKey, flow: Flow, template: ChainTemplate) {
        self.templates.insert((key, flow), template);
    }

    /// Drops every template built for the endpoint.
    pub fn evict_endpoint(&self, id: EndpointId) {
        self.templates
            .retain(|(key, _), _| *key != TemplateKey::Endpoint(id));
    }

    /// Drops every template.
    pub fn clear(&self) {
        self.templates.clear();
    }

    /// Number of cached templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::fixtures::{self, RecordingInterceptor};
    use waypoint_core::InterceptorChain;

    fn template(ids: &[&str]) -> ChainTemplate {
        let trace = fixtures::trace();
        let phases = Arc::new(PhaseRegistry::from_names(["only"]).unwrap());
        let list = ids
            .iter()
            .map(|id| RecordingInterceptor::new(id, "only", &trace).shared())
            .collect();
        ChainTemplate::build(phases, list).unwrap()
    }

    #[test]
    fn test_instances_are_independent() {
        let template = template(&["a", "b"]);
        let first = template.instantiate();
        let second = template.instantiate();

        let trace = fixtures::trace();
        first
            .add(RecordingInterceptor::new("extra", "only", &trace).shared())
            .unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second.iter_ids(), vec!["a", "b"]);
        assert_eq!(template.len(), 2);
    }

    #[test]
    fn test_get_or_build_builds_once() {
        let cache = ChainCache::new();
        let mut builds = 0;
        for _ in 0..3 {
            cache
                .get_or_build(TemplateKey::Bus, Flow::In, || {
                    builds += 1;
                    Ok(template(&["a"]))
                })
                .unwrap();
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_build_error_not_cached() {
        let cache = ChainCache::new();
        let err = cache.get_or_build(TemplateKey::Bus, Flow::Out, || {
            Err(ConfigurationError::UnknownPhase {
                interceptor: "x".to_string(),
                phase: "nowhere".to_string(),
            })
        });
        assert!(err.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_endpoint() {
        let cache = ChainCache::new();
        let (a, b) = (EndpointId::new(), EndpointId::new());
        cache.insert(a.into(), Flow::In, template(&["x"]));
        cache.insert(a.into(), Flow::Out, template(&["x"]));
        cache.insert(b.into(), Flow::In, template(&["x"]));
        cache.insert(TemplateKey::Bus, Flow::In, template(&["x"]));

        cache.evict_endpoint(a);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(b.into(), Flow::In).is_some());
        assert!(cache.get(TemplateKey::Bus, Flow::In).is_some());
        assert!(cache.get(a.into(), Flow::Out).is_none());
    }
}

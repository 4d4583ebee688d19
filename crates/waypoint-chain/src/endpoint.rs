//! Endpoints: the per-service contribution scopes plus service logic.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;
use waypoint_core::{BoxFuture, Exchange, Interceptor};
use waypoint_workqueue::WorkQueue;

use crate::databinding::DataBinding;
use crate::registry::{Flow, InterceptorRegistry, Scope};
use crate::stages::{
    DataBindingInInterceptor, DataBindingOutInterceptor, FaultOutInterceptor,
    MessageSenderInterceptor, OneWayProcessorInterceptor, OutgoingChainInterceptor,
    ServiceInvokerInterceptor,
};

/// Service logic behind an endpoint.
///
/// The returned future is `'static` so it can be handed to a work queue.
pub trait Invoker: Send + Sync {
    /// Invokes the service with the unmarshalled request, if any.
    fn invoke(
        &self,
        exchange: Arc<Exchange>,
        input: Option<Value>,
    ) -> BoxFuture<'static, anyhow::Result<Option<Value>>>;
}

/// Wraps a closure returning a boxed future as an [`Invoker`].
pub struct FnInvoker<F> {
    f: F,
}

impl<F> FnInvoker<F>
where
    F: Fn(Arc<Exchange>, Option<Value>) -> BoxFuture<'static, anyhow::Result<Option<Value>>>
        + Send
        + Sync,
{
    /// Creates an invoker from a closure.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Invoker for FnInvoker<F>
where
    F: Fn(Arc<Exchange>, Option<Value>) -> BoxFuture<'static, anyhow::Result<Option<Value>>>
        + Send
        + Sync,
{
    fn invoke(
        &self,
        exchange: Arc<Exchange>,
        input: Option<Value>,
    ) -> BoxFuture<'static, anyhow::Result<Option<Value>>> {
        (self.f)(exchange, input)
    }
}

/// Identity of one built endpoint.
///
/// Names are labels and may repeat; the id is what chain templates are cached
/// under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(Uuid);

impl EndpointId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named service endpoint.
///
/// Endpoints are immutable once built, so chain templates assembled from them
/// can be cached under their [`EndpointId`].
pub struct Endpoint {
    id: EndpointId,
    name: String,
    interceptors: InterceptorRegistry,
    invoker: Option<Arc<dyn Invoker>>,
    executor: Option<Arc<WorkQueue>>,
    data_binding: Option<Arc<dyn DataBinding>>,
    properties: IndexMap<String, Value>,
}

impl Endpoint {
    /// Starts building an endpoint.
    pub fn builder(name: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(name)
    }

    /// Identity assigned when the endpoint was built.
    #[must_use]
    pub const fn id(&self) -> EndpointId {
        self.id
    }

    /// Endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-bus contribution scopes.
    #[must_use]
    pub const fn interceptors(&self) -> &InterceptorRegistry {
        &self.interceptors
    }

    /// Service logic, if any.
    #[must_use]
    pub fn invoker(&self) -> Option<&Arc<dyn Invoker>> {
        self.invoker.as_ref()
    }

    /// Queue service invocations run on; `None` runs them inline.
    #[must_use]
    pub fn executor(&self) -> Option<&Arc<WorkQueue>> {
        self.executor.as_ref()
    }

    /// Data binding, if any.
    #[must_use]
    pub fn data_binding(&self) -> Option<&Arc<dyn DataBinding>> {
        self.data_binding.as_ref()
    }

    /// Endpoint properties, copied onto each exchange it serves.
    #[must_use]
    pub const fn properties(&self) -> &IndexMap<String, Value> {
        &self.properties
    }

    /// Returns one endpoint property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("interceptors", &self.interceptors)
            .field("invoker", &self.invoker.is_some())
            .field("executor", &self.executor.as_ref().map(|queue| queue.name()))
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Endpoint`].
pub struct EndpointBuilder {
    name: String,
    interceptors: InterceptorRegistry,
    invoker: Option<Arc<dyn Invoker>>,
    executor: Option<Arc<WorkQueue>>,
    data_binding: Option<Arc<dyn DataBinding>>,
    part: Option<String>,
    properties: IndexMap<String, Value>,
    server_stages: bool,
}

impl EndpointBuilder {
    /// Creates a builder for an endpoint called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interceptors: InterceptorRegistry::new(),
            invoker: None,
            executor: None,
            data_binding: None,
            part: None,
            properties: IndexMap::new(),
            server_stages: false,
        }
    }

    /// Contributes an interceptor to `scope` for `flow`.
    ///
    /// The bus scope belongs to [`Bus`](crate::Bus) and is ignored here.
    pub fn interceptor(mut self, scope: Scope, flow: Flow, interceptor: Arc<dyn Interceptor>) -> Self {
        if scope == Scope::Bus {
            tracing::warn!(
                endpoint = %self.name,
                interceptor = interceptor.id(),
                "Bus-scope interceptors must be added to the bus, ignoring"
            );
            return self;
        }
        self.interceptors.add(scope, flow, interceptor);
        self
    }

    /// Sets the service logic.
    pub fn invoker(mut self, invoker: Arc<dyn Invoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Runs service invocations on `queue`.
    pub fn executor(mut self, queue: Arc<WorkQueue>) -> Self {
        self.executor = Some(queue);
        self
    }

    /// Sets the data binding; its interceptors join the data-binding scope.
    pub fn data_binding(mut self, binding: Arc<dyn DataBinding>) -> Self {
        self.data_binding = Some(binding);
        self
    }

    /// Reads and writes a named part instead of the whole document.
    pub fn part(mut self, part: impl Into<String>) -> Self {
        self.part = Some(part.into());
        self
    }

    /// Sets an endpoint property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Adds the standard server-side stages.
    ///
    /// Inbound: one-way processing, service invocation and the outgoing
    /// chain. Outbound and outbound-fault: message sending and, for faults, a
    /// JSON fault writer.
    pub fn server_stages(mut self) -> Self {
        self.server_stages = true;
        self
    }

    /// Builds the endpoint.
    pub fn build(self) -> Endpoint {
        let mut interceptors = self.interceptors;

        if let Some(binding) = &self.data_binding {
            let part = self.part.as_deref();
            interceptors.add(
                Scope::DataBinding,
                Flow::In,
                Arc::new(DataBindingInInterceptor::new(Arc::clone(binding), part)),
            );
            interceptors.add(
                Scope::DataBinding,
                Flow::Out,
                Arc::new(DataBindingOutInterceptor::new(Arc::clone(binding), part)),
            );
        }

        if self.server_stages {
            interceptors.add(Scope::Endpoint, Flow::In, Arc::new(OneWayProcessorInterceptor::new()));
            interceptors.add(Scope::Endpoint, Flow::In, Arc::new(ServiceInvokerInterceptor::new()));
            interceptors.add(Scope::Endpoint, Flow::In, Arc::new(OutgoingChainInterceptor::new()));
            interceptors.add(Scope::Endpoint, Flow::Out, Arc::new(MessageSenderInterceptor::new()));
            interceptors.add(Scope::Binding, Flow::OutFault, Arc::new(FaultOutInterceptor::new()));
            interceptors.add(
                Scope::Endpoint,
                Flow::OutFault,
                Arc::new(MessageSenderInterceptor::new()),
            );
        }

        Endpoint {
            id: EndpointId::new(),
            name: self.name,
            interceptors,
            invoker: self.invoker,
            executor: self.executor,
            data_binding: self.data_binding,
            properties: self.properties,
        }
    }
}

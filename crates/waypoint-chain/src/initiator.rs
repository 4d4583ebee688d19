//! Transport entry point.

use std::sync::Arc;

use tracing::debug;
use waypoint_core::{ChainError, ChainOutcome, InterceptorChain, Message};

use crate::bus::Bus;
use crate::endpoint::Endpoint;
use crate::fault_observer::{FaultChainInitiator, FaultDirection};
use crate::registry::Flow;
use crate::transport::Destination;

/// Starts the inbound chain for messages arriving at an endpoint.
///
/// Before the chain runs, the bus, endpoint and destination are stored as
/// exchange extensions so that stages can reach them. Endpoint properties and
/// then bus properties are copied onto the exchange unless already set.
pub struct ChainInitiator {
    bus: Arc<Bus>,
    endpoint: Arc<Endpoint>,
    destination: Option<Arc<dyn Destination>>,
    fault_direction: FaultDirection,
}

impl ChainInitiator {
    /// Creates a server-side initiator. Faults are answered outbound.
    #[must_use]
    pub fn new(bus: Arc<Bus>, endpoint: Arc<Endpoint>) -> Self {
        Self {
            bus,
            endpoint,
            destination: None,
            fault_direction: FaultDirection::Outbound,
        }
    }

    /// Uses `destination` for back-channels.
    #[must_use]
    pub fn with_destination(mut self, destination: Arc<dyn Destination>) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Treats incoming messages as responses to requests this side sent.
    /// Faults then run through the in-fault chain.
    #[must_use]
    pub fn requestor(mut self) -> Self {
        self.fault_direction = FaultDirection::Inbound;
        self
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Runs `message` through the endpoint's inbound chain.
    pub async fn on_message(&self, mut message: Message) -> Result<ChainOutcome, ChainError> {
        let template = self.bus.chain_template(Flow::In, Some(&*self.endpoint))?;

        let exchange = Arc::clone(message.exchange());
        exchange.set_extension(Arc::clone(&self.bus));
        exchange.set_extension(Arc::clone(&self.endpoint));
        if let Some(destination) = &self.destination {
            exchange.set_extension::<Arc<dyn Destination>>(Arc::clone(destination));
        }
        for (key, value) in self.endpoint.properties() {
            if exchange.property(key).is_none() {
                exchange.set_property(key.clone(), value.clone());
            }
        }
        for (key, value) in self.bus.properties() {
            if exchange.property(&key).is_none() {
                exchange.set_property(key, value);
            }
        }
        if self.fault_direction == FaultDirection::Inbound {
            message.set_requestor(true);
        }

        let chain = Arc::new(template.instantiate());
        chain.set_fault_observer(Some(Arc::new(FaultChainInitiator::new(
            self.fault_direction,
            Arc::clone(&self.bus),
            Some(Arc::clone(&self.endpoint)),
        ))));

        debug!(
            endpoint = self.endpoint.name(),
            exchange_id = %exchange.id(),
            message_id = %message.id(),
            chain_id = %chain.id(),
            one_way = exchange.is_one_way(),
            "Starting inbound chain"
        );
        chain.do_intercept(message).await
    }
}

impl std::fmt::Debug for ChainInitiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainInitiator")
            .field("endpoint", &self.endpoint.name())
            .field("fault_direction", &self.fault_direction)
            .field("has_destination", &self.destination.is_some())
            .finish_non_exhaustive()
    }
}

//! Fault-chain dispatch.
//!
//! When a primary chain aborts on a fault it hands the faulted message to its
//! [`FaultObserver`]. The [`FaultChainInitiator`] builds a dedicated fault
//! message, assembles a fresh chain from the fault contributions of the bus
//! and endpoint, and runs it. A fault raised inside that chain is not handled
//! again; it is logged and returned as [`ChainError::FaultProcessing`].

use std::fmt;
use std::sync::Arc;

use http::header::CONTENT_TYPE;
use tracing::{debug, error};
use waypoint_core::{
    BoxFuture, ChainError, ChainOutcome, Fault, FaultDescriptor, FaultObserver, Message,
    MessageRole,
};
use waypoint_telemetry::metrics as telemetry;

use crate::bus::Bus;
use crate::endpoint::Endpoint;
use crate::registry::Flow;
use crate::transport::{back_channel_for, Conduit};

/// Which fault chain an initiator dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultDirection {
    /// Faults received by a requestor.
    Inbound,
    /// Faults sent back to the peer.
    Outbound,
}

impl FaultDirection {
    /// Flow whose contributions make up the fault chain.
    #[must_use]
    pub const fn flow(self) -> Flow {
        match self {
            Self::Inbound => Flow::InFault,
            Self::Outbound => Flow::OutFault,
        }
    }

    /// Role of the fault message.
    #[must_use]
    pub const fn role(self) -> MessageRole {
        match self {
            Self::Inbound => MessageRole::InboundFault,
            Self::Outbound => MessageRole::OutboundFault,
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl fmt::Display for FaultDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault observer that runs the in-fault or out-fault chain.
///
/// The direction is fixed at construction; it is never inferred from the
/// faulted message.
pub struct FaultChainInitiator {
    direction: FaultDirection,
    bus: Arc<Bus>,
    endpoint: Option<Arc<Endpoint>>,
}

impl FaultChainInitiator {
    /// Creates an initiator for `direction`.
    #[must_use]
    pub fn new(direction: FaultDirection, bus: Arc<Bus>, endpoint: Option<Arc<Endpoint>>) -> Self {
        Self {
            direction,
            bus,
            endpoint,
        }
    }

    /// Initiator for faults answered to the peer.
    #[must_use]
    pub fn outbound(bus: Arc<Bus>, endpoint: Option<Arc<Endpoint>>) -> Self {
        Self::new(FaultDirection::Outbound, bus, endpoint)
    }

    /// Initiator for faults received as a requestor.
    #[must_use]
    pub fn inbound(bus: Arc<Bus>, endpoint: Option<Arc<Endpoint>>) -> Self {
        Self::new(FaultDirection::Inbound, bus, endpoint)
    }

    /// Returns the direction.
    #[must_use]
    pub const fn direction(&self) -> FaultDirection {
        self.direction
    }

    /// Builds the fault message. Creating it moves the exchange's fault leg
    /// onto the new message.
    fn fault_message(&self, faulted: &Message, fault: Fault) -> Result<Message, Fault> {
        let exchange = Arc::clone(faulted.exchange());
        let mut message = Message::new(exchange, self.direction.role());

        message.set_fault_mode(faulted.fault_mode().unwrap_or_default());
        message.set_requestor(faulted.is_requestor());
        if let Some(descriptor) = faulted.fault_descriptor() {
            message.set_content::<FaultDescriptor>(descriptor.clone());
        }
        if let Some(content_type) = faulted.headers().get(CONTENT_TYPE) {
            message
                .headers_mut()
                .insert(CONTENT_TYPE, content_type.clone());
        }
        if self.direction == FaultDirection::Outbound {
            let conduit = match faulted.content::<Arc<dyn Conduit>>() {
                Some(conduit) => Some(Arc::clone(conduit)),
                None => back_channel_for(faulted)?,
            };
            if let Some(conduit) = conduit {
                message.set_content::<Arc<dyn Conduit>>(conduit);
            }
        }
        message.set_exception(fault);
        Ok(message)
    }

    async fn dispatch(&self, faulted: &mut Message) -> Result<Option<Message>, ChainError> {
        let direction = self.direction.as_str();
        let fault = faulted.take_exception().map_or_else(
            || Fault::server("chain aborted without an exception"),
            Fault::from_error,
        );
        faulted.set_exception(fault.clone());

        let flow = self.direction.flow();
        let template = match self.bus.chain_template(flow, self.endpoint.as_deref()) {
            Ok(template) => template,
            Err(e) => {
                error!(direction, error = %e, "Cannot assemble fault chain");
                telemetry::record_fault_chain(direction, false);
                return Err(e.into());
            }
        };

        let message = match self.fault_message(faulted, fault) {
            Ok(message) => message,
            Err(e) => {
                error!(direction, error = %e, "Cannot create fault message");
                telemetry::record_fault_chain(direction, false);
                return Err(ChainError::fault_processing("cannot create fault message", e));
            }
        };

        let chain = Arc::new(template.instantiate());
        debug!(
            direction,
            exchange_id = %faulted.exchange().id(),
            message_id = %message.id(),
            chain_id = %chain.id(),
            "Dispatching fault chain"
        );

        match chain.do_intercept(message).await {
            Ok(ChainOutcome::Complete(message)) => {
                telemetry::record_fault_chain(direction, true);
                Ok(Some(message))
            }
            Ok(ChainOutcome::Aborted { message, .. }) => match message.fault() {
                Some(inner) => {
                    error!(
                        direction,
                        interceptor = chain.faulted_at().as_deref().unwrap_or("unknown"),
                        error = %inner,
                        "Fault raised while processing fault chain"
                    );
                    telemetry::record_fault_chain(direction, false);
                    Err(ChainError::fault_processing(
                        "fault chain failed",
                        inner.clone(),
                    ))
                }
                None => {
                    telemetry::record_fault_chain(direction, true);
                    Ok(None)
                }
            },
            Ok(ChainOutcome::Paused | ChainOutcome::Delegated) => Ok(None),
            Err(e) => {
                error!(direction, error = %e, "Fault chain could not run");
                telemetry::record_fault_chain(direction, false);
                Err(e)
            }
        }
    }
}

impl FaultObserver for FaultChainInitiator {
    fn on_fault<'a>(
        &'a self,
        message: &'a mut Message,
    ) -> BoxFuture<'a, Result<Option<Message>, ChainError>> {
        Box::pin(self.dispatch(message))
    }
}

impl fmt::Debug for FaultChainInitiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultChainInitiator")
            .field("direction", &self.direction)
            .field("endpoint", &self.endpoint.as_ref().map(|e| e.name()))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::fixtures::{self, RecordingInterceptor};
    use waypoint_core::phase::names;
    use waypoint_core::{FaultMode, Leg};

    fn faulted(fault: Fault) -> Message {
        let mut message = Message::inbound();
        message.set_exception(fault);
        message
    }

    #[tokio::test]
    async fn test_runs_out_fault_chain() {
        let trace = fixtures::trace();
        let bus = Arc::new(
            Bus::builder()
                .interceptor(
                    Flow::OutFault,
                    RecordingInterceptor::new("fault-writer", names::MARSHAL, &trace).shared(),
                )
                .build(),
        );
        let initiator = FaultChainInitiator::outbound(bus, None);
        let mut message = faulted(Fault::client("bad input"));
        message.set_fault_mode(FaultMode::CheckedApplicationFault);
        message.set_content(FaultDescriptor::new("BadInput"));

        let fault_message = initiator.on_fault(&mut message).await.unwrap().unwrap();

        assert_eq!(fixtures::entries(&trace), vec!["fault-writer"]);
        assert_eq!(fault_message.role(), MessageRole::OutboundFault);
        assert_eq!(fault_message.fault().map(Fault::message), Some("bad input"));
        assert_eq!(
            fault_message.fault_mode(),
            Some(FaultMode::CheckedApplicationFault)
        );
        assert_eq!(
            fault_message.fault_descriptor().map(|d| d.name.as_str()),
            Some("BadInput")
        );
        assert_eq!(
            message.exchange().leg(Leg::OutFault),
            Some(fault_message.id())
        );
    }

    #[tokio::test]
    async fn test_plain_error_is_normalized() {
        let bus = Arc::new(Bus::new());
        let initiator = FaultChainInitiator::outbound(bus, None);
        let mut message = Message::inbound();
        message.set_exception(anyhow::anyhow!("disk full"));

        let fault_message = initiator.on_fault(&mut message).await.unwrap().unwrap();

        assert_eq!(message.fault().map(Fault::message), Some("disk full"));
        let fault = fault_message.fault().unwrap();
        assert_eq!(fault.message(), "disk full");
        assert_eq!(fault.status_code(), 500);
        assert_eq!(
            fault_message.fault_mode(),
            Some(FaultMode::UncheckedApplicationFault)
        );
    }

    #[tokio::test]
    async fn test_inbound_direction_uses_in_fault_flow() {
        let trace = fixtures::trace();
        let bus = Arc::new(
            Bus::builder()
                .interceptor(
                    Flow::InFault,
                    RecordingInterceptor::new("in-fault", names::RECEIVE, &trace).shared(),
                )
                .interceptor(
                    Flow::OutFault,
                    RecordingInterceptor::new("out-fault", names::SEND, &trace).shared(),
                )
                .build(),
        );
        let initiator = FaultChainInitiator::inbound(bus, None);
        let mut message = faulted(Fault::server("remote failure"));
        message.set_requestor(true);

        let fault_message = initiator.on_fault(&mut message).await.unwrap().unwrap();

        assert_eq!(fixtures::entries(&trace), vec!["in-fault"]);
        assert_eq!(fault_message.role(), MessageRole::InboundFault);
        assert!(fault_message.is_requestor());
    }

    #[tokio::test]
    async fn test_fault_of_fault_is_escalated() {
        let trace = fixtures::trace();
        let bus = Arc::new(
            Bus::builder()
                .interceptor(
                    Flow::OutFault,
                    RecordingInterceptor::new("broken-writer", names::MARSHAL, &trace)
                        .failing(Fault::server("writer exploded"))
                        .shared(),
                )
                .build(),
        );
        let initiator = FaultChainInitiator::outbound(bus, None);
        let mut message = faulted(Fault::client("bad input"));

        let err = initiator.on_fault(&mut message).await.unwrap_err();

        match err {
            ChainError::FaultProcessing { fault, .. } => {
                assert_eq!(fault.message(), "writer exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_misconfigured_fault_chain_is_error() {
        let trace = fixtures::trace();
        let bus = Arc::new(
            Bus::builder()
                .interceptor(
                    Flow::OutFault,
                    RecordingInterceptor::new("lost", "no-such-phase", &trace).shared(),
                )
                .build(),
        );
        let initiator = FaultChainInitiator::outbound(bus, None);
        let mut message = faulted(Fault::client("bad input"));

        let err = initiator.on_fault(&mut message).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_direction_helpers() {
        assert_eq!(FaultDirection::Inbound.flow(), Flow::InFault);
        assert_eq!(FaultDirection::Outbound.role(), MessageRole::OutboundFault);
        assert_eq!(FaultDirection::Outbound.to_string(), "outbound");
    }
}

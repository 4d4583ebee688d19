//! Response dispatch after invocation.

use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::HeaderValue;
use serde_json::Value;
use tracing::debug;
use waypoint_core::phase::names;
use waypoint_core::{
    BoxFuture, ChainOutcome, Fault, Interceptor, InterceptorChain, InterceptorMeta, Message,
    MessageRole,
};

use crate::bus::Bus;
use crate::endpoint::Endpoint;
use crate::fault_observer::FaultChainInitiator;
use crate::registry::Flow;
use crate::stages::invoker::InvocationResult;
use crate::transport::{back_channel_for, Conduit};

/// Builds the outbound message from the invocation result and runs the
/// outbound chain for it.
///
/// One-way exchanges have no response and are left alone.
#[derive(Debug)]
pub struct OutgoingChainInterceptor {
    meta: InterceptorMeta,
}

impl OutgoingChainInterceptor {
    /// Interceptor id.
    pub const ID: &'static str = "outgoing-chain";

    /// Creates the interceptor in the post-invoke phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            meta: InterceptorMeta::new(Self::ID, names::POST_INVOKE),
        }
    }

    fn outbound_message(inbound: &Message) -> Result<Message, Fault> {
        let exchange = Arc::clone(inbound.exchange());
        let mut outbound = Message::new(Arc::clone(&exchange), MessageRole::Outbound);
        outbound.set_requestor(inbound.is_requestor());

        if let Some(InvocationResult(Some(value))) = exchange.extension::<InvocationResult>() {
            outbound.set_content::<Value>(value);
        }
        if let Some(content_type) = inbound.content_type() {
            if let Ok(value) = HeaderValue::from_str(content_type) {
                outbound.headers_mut().insert(CONTENT_TYPE, value);
            }
        }
        if let Some(conduit) = back_channel_for(inbound)? {
            outbound.set_content::<Arc<dyn Conduit>>(conduit);
        }
        Ok(outbound)
    }
}

impl Default for OutgoingChainInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for OutgoingChainInterceptor {
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            let exchange = Arc::clone(message.exchange());
            if exchange.is_one_way() {
                return Ok(());
            }
            let bus = exchange
                .extension::<Arc<Bus>>()
                .ok_or_else(|| Fault::server("no bus on exchange"))?;
            let endpoint = exchange.extension::<Arc<Endpoint>>();

            let template = bus
                .chain_template(Flow::Out, endpoint.as_deref())
                .map_err(|e| Fault::server(e.to_string()))?;
            let chain = Arc::new(template.instantiate());
            chain.set_fault_observer(Some(Arc::new(FaultChainInitiator::outbound(
                Arc::clone(&bus),
                endpoint,
            ))));

            let outbound = Self::outbound_message(message)?;
            debug!(
                exchange_id = %exchange.id(),
                message_id = %outbound.id(),
                chain_id = %chain.id(),
                "Running outbound chain"
            );

            match chain.do_intercept(outbound).await {
                Ok(ChainOutcome::Aborted { message: out, .. }) => {
                    debug!(
                        exchange_id = %exchange.id(),
                        faulted = out.fault().is_some(),
                        "Outbound chain aborted"
                    );
                    Ok(())
                }
                Ok(_) => Ok(()),
                Err(e) => Err(Fault::server(format!("outbound chain failed: {e}"))),
            }
        })
    }
}

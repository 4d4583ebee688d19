//! One-way dispatch.
//!
//! A server-side one-way exchange has no logical response, so the transport
//! is released immediately with an empty acknowledgement. The rest of the
//! chain then either continues on the calling task or is handed to the
//! automatic work queue.
//!
//! ## Hand-off
//!
//! The chain is paused before the resume task is submitted. If the queue
//! rejects the task, the pause is cancelled and the chain simply continues
//! inline; no work is dropped. If the worker resumes before this interceptor
//! has returned, the chain notices and continues here instead of parking.

use std::sync::Arc;

use tracing::{debug, warn};
use waypoint_core::phase::names;
use waypoint_core::{
    BoxFuture, ChainOutcome, Fault, Interceptor, InterceptorChain, InterceptorMeta, Leg, Message,
    MessageRole,
};

use crate::bus::Bus;
use crate::transport::{back_channel_for, ACCEPTED, RESPONSE_CODE};

/// Property that keeps one-way processing on the calling task.
pub const USE_ORIGINAL_THREAD: &str = "waypoint.oneway.use_original_thread";

/// Exchange property marking a one-way exchange as already acknowledged.
pub const ONE_WAY_PROCESSED: &str = "waypoint.oneway.processed";

/// Acknowledges one-way exchanges and moves the rest of the chain off the
/// transport task.
#[derive(Debug)]
pub struct OneWayProcessorInterceptor {
    meta: InterceptorMeta,
}

impl OneWayProcessorInterceptor {
    /// Interceptor id.
    pub const ID: &'static str = "one-way-processor";

    /// Creates the interceptor in the pre-logical phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            meta: InterceptorMeta::new(Self::ID, names::PRE_LOGICAL),
        }
    }

    async fn acknowledge(message: &Message) -> Result<(), Fault> {
        let Some(conduit) = back_channel_for(message)? else {
            debug!(message_id = %message.id(), "No back-channel, skipping acknowledgement");
            return Ok(());
        };

        let exchange = Arc::clone(message.exchange());
        let mut partial = Message::new(Arc::clone(&exchange), MessageRole::Outbound);
        partial.set_property(RESPONSE_CODE, ACCEPTED);

        let sent = async {
            conduit.prepare(&mut partial).await?;
            conduit.close(&mut partial).await
        }
        .await;
        // A one-way exchange has no real outbound leg.
        exchange.clear_leg(Leg::Out);
        sent
    }

    fn hand_off(message: &Message, chain: Arc<dyn InterceptorChain>) -> Result<(), Fault> {
        let Some(bus) = message.exchange().extension::<Arc<Bus>>() else {
            debug!(message_id = %message.id(), "No bus on exchange, continuing inline");
            return Ok(());
        };
        let queue = bus.work_queues().automatic_work_queue();

        chain
            .pause()
            .map_err(|e| Fault::server(format!("cannot pause one-way chain: {e}")))?;

        let resumed = Arc::clone(&chain);
        let message_id = message.id();
        let submitted = queue.execute(async move {
            match resumed.resume().await {
                Ok(ChainOutcome::Delegated) => {
                    debug!(%message_id, "One-way chain continued on the original task");
                }
                Ok(outcome) => {
                    debug!(%message_id, complete = outcome.is_complete(), "One-way chain resumed");
                }
                Err(e) => warn!(%message_id, error = %e, "Failed to resume one-way chain"),
            }
        });

        match submitted {
            Ok(task_id) => {
                debug!(%message_id, %task_id, queue = queue.name(), "One-way chain handed off");
            }
            Err(e) => {
                chain.unpause();
                if e.is_rejected() {
                    debug!(%message_id, queue = queue.name(), "Work queue saturated, continuing inline");
                } else {
                    warn!(%message_id, error = %e, "One-way hand-off failed, continuing inline");
                }
            }
        }
        Ok(())
    }
}

impl Default for OneWayProcessorInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for OneWayProcessorInterceptor {
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            let exchange = Arc::clone(message.exchange());
            if !exchange.is_one_way() || message.is_requestor() {
                return Ok(());
            }
            if exchange.property(ONE_WAY_PROCESSED).is_some() {
                return Ok(());
            }
            exchange.set_property(ONE_WAY_PROCESSED, true);

            if let Err(fault) = Self::acknowledge(message).await {
                warn!(message_id = %message.id(), error = %fault, "Failed to acknowledge one-way request");
            }

            if message.contextual_flag(USE_ORIGINAL_THREAD) {
                return Ok(());
            }

            let chain = message
                .interceptor_chain()
                .ok_or_else(|| Fault::server("no chain attached to one-way message"))?;
            Self::hand_off(message, chain)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Destination, LocalDestination};

    #[tokio::test]
    async fn test_two_way_untouched() {
        let interceptor = OneWayProcessorInterceptor::new();
        let mut message = Message::inbound();
        interceptor.handle_message(&mut message).await.unwrap();
        assert!(message.exchange().property(ONE_WAY_PROCESSED).is_none());
    }

    #[tokio::test]
    async fn test_original_thread_acknowledges_and_continues() {
        let destination = Arc::new(LocalDestination::new());
        let interceptor = OneWayProcessorInterceptor::new();

        let mut message = Message::inbound();
        message.exchange().set_one_way(true);
        message
            .exchange()
            .set_extension(Arc::clone(&destination) as Arc<dyn Destination>);
        message.set_property(USE_ORIGINAL_THREAD, true);

        interceptor.handle_message(&mut message).await.unwrap();

        let sent = destination.conduit().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, Some(ACCEPTED));
        assert!(message.exchange().leg(Leg::Out).is_none());

        // Only the first pass acknowledges.
        interceptor.handle_message(&mut message).await.unwrap();
        assert_eq!(destination.conduit().sent().len(), 1);
    }
}

//! Conduit handling for outbound messages.

use std::sync::Arc;

use waypoint_core::phase::names;
use waypoint_core::{BoxFuture, Fault, Interceptor, InterceptorMeta, Message};

use crate::transport::Conduit;

fn conduit_for(message: &Message) -> Result<Arc<dyn Conduit>, Fault> {
    message
        .contextual_content::<Arc<dyn Conduit>>()
        .ok_or_else(|| Fault::server("no conduit for outbound message"))
}

/// Prepares the conduit and schedules its close at the end of the chain.
#[derive(Debug)]
pub struct MessageSenderInterceptor {
    meta: InterceptorMeta,
}

impl MessageSenderInterceptor {
    /// Interceptor id.
    pub const ID: &'static str = "message-sender";

    /// Creates the interceptor in the prepare-send phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            meta: InterceptorMeta::new(Self::ID, names::PREPARE_SEND),
        }
    }
}

impl Default for MessageSenderInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for MessageSenderInterceptor {
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            let conduit = conduit_for(message)?;
            conduit.prepare(message).await?;

            let chain = message
                .interceptor_chain()
                .ok_or_else(|| Fault::server("no chain attached to outbound message"))?;
            chain
                .add(Arc::new(MessageSenderEndingInterceptor::new()))
                .map_err(|e| Fault::server(e.to_string()))
        })
    }
}

/// Closes the conduit opened by [`MessageSenderInterceptor`].
///
/// Added mid-flight; never registered directly.
#[derive(Debug)]
pub struct MessageSenderEndingInterceptor {
    meta: InterceptorMeta,
}

impl MessageSenderEndingInterceptor {
    /// Interceptor id.
    pub const ID: &'static str = "message-sender-ending";

    /// Creates the interceptor in the prepare-send-ending phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            meta: InterceptorMeta::new(Self::ID, names::PREPARE_SEND_ENDING),
        }
    }
}

impl Default for MessageSenderEndingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for MessageSenderEndingInterceptor {
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            let conduit = conduit_for(message)?;
            conduit.close(message).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::PhaseInterceptorChain;
    use crate::transport::LocalConduit;
    use waypoint_core::fixtures::{self, RecordingInterceptor};
    use waypoint_core::{MessageRole, PhaseRegistry};

    #[tokio::test]
    async fn test_close_is_added_after_send() {
        let trace = fixtures::trace();
        let chain = Arc::new(
            PhaseInterceptorChain::with_interceptors(
                Arc::new(PhaseRegistry::default_outbound()),
                vec![
                    Arc::new(MessageSenderInterceptor::new()) as Arc<dyn Interceptor>,
                    RecordingInterceptor::new("writer", names::SEND, &trace).shared(),
                ],
            )
            .unwrap(),
        );
        let conduit = Arc::new(LocalConduit::new());

        let mut message = Message::new(
            Arc::new(waypoint_core::Exchange::new()),
            MessageRole::Outbound,
        );
        message.set_content::<Arc<dyn Conduit>>(Arc::clone(&conduit) as Arc<dyn Conduit>);

        let outcome = chain.do_intercept(message).await.unwrap();

        assert!(outcome.is_complete());
        assert_eq!(
            chain.iter_ids(),
            vec![
                MessageSenderInterceptor::ID,
                "writer",
                MessageSenderEndingInterceptor::ID
            ]
        );
        assert_eq!(conduit.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_conduit_faults() {
        let mut message = Message::inbound();
        let fault = MessageSenderInterceptor::new()
            .handle_message(&mut message)
            .await
            .unwrap_err();
        assert!(fault.message().contains("no conduit"));
    }
}

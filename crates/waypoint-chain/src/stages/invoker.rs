//! Service invocation.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use waypoint_core::phase::names;
use waypoint_core::{BoxFuture, Fault, Interceptor, InterceptorMeta, Message};

use crate::endpoint::Endpoint;

/// Exchange extension holding the service result.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult(pub Option<Value>);

/// Exchange extension naming the work queue the exchange is running on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentExecutor(pub String);

/// Calls the endpoint's [`Invoker`](crate::Invoker).
///
/// When the endpoint has its own executor and the exchange is not already
/// running on it, the call is submitted there. The chain waits for the result
/// unless the exchange is one-way.
#[derive(Debug)]
pub struct ServiceInvokerInterceptor {
    meta: InterceptorMeta,
}

impl ServiceInvokerInterceptor {
    /// Interceptor id.
    pub const ID: &'static str = "service-invoker";

    /// Creates the interceptor in the invoke phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            meta: InterceptorMeta::new(Self::ID, names::INVOKE),
        }
    }
}

impl Default for ServiceInvokerInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for ServiceInvokerInterceptor {
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            let exchange = Arc::clone(message.exchange());
            let endpoint = exchange
                .extension::<Arc<Endpoint>>()
                .ok_or_else(|| Fault::server("no endpoint on exchange"))?;
            let Some(invoker) = endpoint.invoker().cloned() else {
                debug!(endpoint = endpoint.name(), "Endpoint has no invoker");
                return Ok(());
            };

            let input = message.content::<Value>().cloned();
            let invocation = invoker.invoke(Arc::clone(&exchange), input);

            let current = exchange.extension::<CurrentExecutor>();
            let executor = endpoint
                .executor()
                .filter(|queue| current.as_ref().map_or(true, |c| c.0 != queue.name()));

            let Some(queue) = executor else {
                let output = invocation.await.map_err(Fault::from_error)?;
                exchange.set_extension(InvocationResult(output));
                return Ok(());
            };

            exchange.set_extension(CurrentExecutor(queue.name().to_string()));
            debug!(endpoint = endpoint.name(), queue = queue.name(), "Switching executor for invocation");

            if exchange.is_one_way() {
                let endpoint_name = endpoint.name().to_string();
                queue
                    .execute(async move {
                        if let Err(e) = invocation.await {
                            warn!(endpoint = %endpoint_name, error = %e, "One-way invocation failed");
                        }
                    })
                    .map_err(|e| Fault::server(e.to_string()).with_status(503))?;
                return Ok(());
            }

            let handle = queue
                .submit(invocation)
                .map_err(|e| Fault::server(e.to_string()).with_status(503))?;
            let output = handle
                .join()
                .await
                .map_err(|e| Fault::server(format!("invocation did not complete: {e}")))?
                .map_err(Fault::from_error)?;
            exchange.set_extension(InvocationResult(output));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Invoker;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use waypoint_core::FaultCode;
    use waypoint_workqueue::{WorkQueue, WorkQueueConfig};

    struct Doubler;

    impl Invoker for Doubler {
        fn invoke(
            &self,
            _exchange: Arc<waypoint_core::Exchange>,
            input: Option<Value>,
        ) -> BoxFuture<'static, anyhow::Result<Option<Value>>> {
            Box::pin(async move {
                let n = input
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| anyhow!("expected a number"))?;
                Ok(Some(Value::from(n * 2)))
            })
        }
    }

    struct Refusing;

    impl Invoker for Refusing {
        fn invoke(
            &self,
            _exchange: Arc<waypoint_core::Exchange>,
            _input: Option<Value>,
        ) -> BoxFuture<'static, anyhow::Result<Option<Value>>> {
            Box::pin(async { Err(Fault::client("declined").into()) })
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl Invoker for Counting {
        fn invoke(
            &self,
            _exchange: Arc<waypoint_core::Exchange>,
            _input: Option<Value>,
        ) -> BoxFuture<'static, anyhow::Result<Option<Value>>> {
            let calls = Arc::clone(&self.0);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
        }
    }

    fn message_for(endpoint: Endpoint, input: Value) -> Message {
        let mut message = Message::inbound();
        message.exchange().set_extension(Arc::new(endpoint));
        message.set_content(input);
        message
    }

    #[tokio::test]
    async fn test_inline_invocation_stores_result() {
        let endpoint = Endpoint::builder("math").invoker(Arc::new(Doubler)).build();
        let mut message = message_for(endpoint, Value::from(21));

        ServiceInvokerInterceptor::new()
            .handle_message(&mut message)
            .await
            .unwrap();

        assert_eq!(
            message.exchange().extension::<InvocationResult>(),
            Some(InvocationResult(Some(Value::from(42))))
        );
    }

    #[tokio::test]
    async fn test_executor_switch_waits_for_result() {
        let queue = Arc::new(WorkQueue::new(WorkQueueConfig::new("invokers")).unwrap());
        let endpoint = Endpoint::builder("math")
            .invoker(Arc::new(Doubler))
            .executor(Arc::clone(&queue))
            .build();
        let mut message = message_for(endpoint, Value::from(5));

        ServiceInvokerInterceptor::new()
            .handle_message(&mut message)
            .await
            .unwrap();

        let exchange = message.exchange();
        assert_eq!(
            exchange.extension::<InvocationResult>(),
            Some(InvocationResult(Some(Value::from(10))))
        );
        assert_eq!(
            exchange.extension::<CurrentExecutor>(),
            Some(CurrentExecutor("invokers".to_string()))
        );
        assert_eq!(queue.stats().total_accepted(), 1);
    }

    #[tokio::test]
    async fn test_same_executor_runs_inline() {
        let queue = Arc::new(WorkQueue::new(WorkQueueConfig::new("invokers")).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let endpoint = Endpoint::builder("math")
            .invoker(Arc::new(Counting(Arc::clone(&calls))))
            .executor(Arc::clone(&queue))
            .build();
        let mut message = message_for(endpoint, Value::Null);
        message
            .exchange()
            .set_extension(CurrentExecutor("invokers".to_string()));

        ServiceInvokerInterceptor::new()
            .handle_message(&mut message)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().total_accepted(), 0);
    }

    #[tokio::test]
    async fn test_invoker_fault_is_unwrapped() {
        let queue = Arc::new(WorkQueue::new(WorkQueueConfig::new("invokers")).unwrap());
        let endpoint = Endpoint::builder("picky")
            .invoker(Arc::new(Refusing))
            .executor(queue)
            .build();
        let mut message = message_for(endpoint, Value::Null);

        let fault = ServiceInvokerInterceptor::new()
            .handle_message(&mut message)
            .await
            .unwrap_err();

        assert_eq!(fault.code(), &FaultCode::Sender);
        assert_eq!(fault.message(), "declined");
    }

    #[tokio::test]
    async fn test_plain_error_becomes_server_fault() {
        let endpoint = Endpoint::builder("math").invoker(Arc::new(Doubler)).build();
        let mut message = message_for(endpoint, Value::from("nope"));

        let fault = ServiceInvokerInterceptor::new()
            .handle_message(&mut message)
            .await
            .unwrap_err();

        assert_eq!(fault.code(), &FaultCode::Receiver);
        assert!(fault.message().contains("expected a number"));
    }

    #[tokio::test]
    async fn test_one_way_does_not_wait() {
        let queue = Arc::new(WorkQueue::new(WorkQueueConfig::new("invokers")).unwrap());
        let endpoint = Endpoint::builder("sink")
            .invoker(Arc::new(Counting(Arc::new(AtomicUsize::new(0)))))
            .executor(Arc::clone(&queue))
            .build();
        let mut message = message_for(endpoint, Value::Null);
        message.exchange().set_one_way(true);

        ServiceInvokerInterceptor::new()
            .handle_message(&mut message)
            .await
            .unwrap();

        assert!(message.exchange().extension::<InvocationResult>().is_none());
        assert_eq!(queue.stats().total_accepted(), 1);
    }
}

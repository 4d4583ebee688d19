//! Test fixtures for chain development and testing.
//!
//! These interceptors write to a shared [`Trace`] so tests can assert on the
//! exact order of `handle_message` and `handle_fault` calls.
//!
//! # Example
//!
//! ```
//! use waypoint_core::fixtures::{self, RecordingInterceptor};
//! use waypoint_core::{Interceptor, Message};
//!
//! # tokio_test::block_on(async {
//! let trace = fixtures::trace();
//! let first = RecordingInterceptor::new("first", "receive", &trace);
//!
//! let mut message = Message::inbound();
//! first.handle_message(&mut message).await.unwrap();
//! first.handle_fault(&mut message);
//!
//! assert_eq!(fixtures::entries(&trace), vec!["first", "fault:first"]);
//! # });
//! ```

use crate::fault::Fault;
use crate::interceptor::{BoxFuture, Interceptor, InterceptorMeta};
use crate::message::Message;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared, ordered log of interceptor calls.
pub type Trace = Arc<Mutex<Vec<String>>>;

/// Creates an empty trace.
#[must_use]
pub fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

/// Returns a snapshot of the trace.
#[must_use]
pub fn entries(trace: &Trace) -> Vec<String> {
    trace.lock().clone()
}

/// Records `id` on each message and `fault:id` on each unwind.
///
/// Optionally fails with a fixed fault.
pub struct RecordingInterceptor {
    meta: InterceptorMeta,
    trace: Trace,
    fault: Option<Fault>,
}

impl RecordingInterceptor {
    /// Creates a recording interceptor.
    #[must_use]
    pub fn new(id: &str, phase: &str, trace: &Trace) -> Self {
        Self::with_meta(InterceptorMeta::new(id, phase), trace)
    }

    /// Creates a recording interceptor with explicit ordering metadata.
    #[must_use]
    pub fn with_meta(meta: InterceptorMeta, trace: &Trace) -> Self {
        Self {
            meta,
            trace: Arc::clone(trace),
            fault: None,
        }
    }

    /// Makes `handle_message` return this fault after recording.
    #[must_use]
    pub fn failing(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Wraps the interceptor for use in a chain.
    #[must_use]
    pub fn shared(self) -> Arc<dyn Interceptor> {
        Arc::new(self)
    }
}

impl Interceptor for RecordingInterceptor {
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, _message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            self.trace.lock().push(self.meta.id().to_string());
            match &self.fault {
                Some(fault) => Err(fault.clone()),
                None => Ok(()),
            }
        })
    }

    fn handle_fault(&self, _message: &mut Message) {
        self.trace.lock().push(format!("fault:{}", self.meta.id()));
    }
}

/// How a [`PausingInterceptor`] stops the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseMode {
    /// `pause()`: resume continues with the next interceptor.
    Pause,
    /// `suspend()`: resume re-runs this interceptor.
    Suspend,
}

/// Pauses the driving chain on its first invocation only.
pub struct PausingInterceptor {
    meta: InterceptorMeta,
    trace: Trace,
    mode: PauseMode,
    calls: AtomicUsize,
}

impl PausingInterceptor {
    /// Creates an interceptor that pauses once.
    #[must_use]
    pub fn new(id: &str, phase: &str, trace: &Trace, mode: PauseMode) -> Self {
        Self {
            meta: InterceptorMeta::new(id, phase),
            trace: Arc::clone(trace),
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of times `handle_message` ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Interceptor for PausingInterceptor {
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(async move {
            self.trace.lock().push(self.meta.id().to_string());
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Ok(());
            }
            let chain = message
                .interceptor_chain()
                .ok_or_else(|| Fault::server("no chain attached to message"))?;
            let paused = match self.mode {
                PauseMode::Pause => chain.pause(),
                PauseMode::Suspend => chain.suspend(),
            };
            paused.map_err(|err| Fault::server(err.to_string()))
        })
    }

    fn handle_fault(&self, _message: &mut Message) {
        self.trace.lock().push(format!("fault:{}", self.meta.id()));
    }
}

//! The interceptor trait and its ordering metadata.
//!
//! An [`Interceptor`] is a unit of work bound to exactly one phase. Its
//! [`InterceptorMeta`] names the phase and the same-phase interceptors it must
//! run before or after; the chain uses that metadata to linearize.
//!
//! Interceptor instances are shared configuration: one instance serves every
//! concurrent chain, so all per-request state belongs on the [`Message`].
//!
//! # Example
//!
//! ```
//! use waypoint_core::{BoxFuture, Fault, Interceptor, InterceptorMeta, Message};
//!
//! struct Audit {
//!     meta: InterceptorMeta,
//! }
//!
//! impl Interceptor for Audit {
//!     fn meta(&self) -> &InterceptorMeta {
//!         &self.meta
//!     }
//!
//!     fn handle_message<'a>(
//!         &'a self,
//!         message: &'a mut Message,
//!     ) -> BoxFuture<'a, Result<(), Fault>> {
//!         Box::pin(async move {
//!             message.set_property("audited", true);
//!             Ok(())
//!         })
//!     }
//! }
//!
//! let audit = Audit {
//!     meta: InterceptorMeta::new("audit", "pre-invoke").add_after("authorize"),
//! };
//! assert_eq!(audit.id(), "audit");
//! assert!(audit.after().contains("authorize"));
//! ```

use crate::fault::Fault;
use crate::message::Message;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identity, phase and ordering constraints of an interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorMeta {
    id: String,
    phase: String,
    before: BTreeSet<String>,
    after: BTreeSet<String>,
}

impl InterceptorMeta {
    /// Creates metadata with an explicit id.
    #[must_use]
    pub fn new(id: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
            before: BTreeSet::new(),
            after: BTreeSet::new(),
        }
    }

    /// Creates metadata whose id is the type name of `T`.
    #[must_use]
    pub fn for_type<T: ?Sized>(phase: impl Into<String>) -> Self {
        Self::new(std::any::type_name::<T>(), phase)
    }

    /// Requires this interceptor to run before `id` within the phase.
    #[must_use]
    pub fn add_before(mut self, id: impl Into<String>) -> Self {
        self.before.insert(id.into());
        self
    }

    /// Requires this interceptor to run after `id` within the phase.
    #[must_use]
    pub fn add_after(mut self, id: impl Into<String>) -> Self {
        self.after.insert(id.into());
        self
    }

    /// Overrides the id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Returns the id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the phase name.
    #[must_use]
    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Ids that must run after this interceptor.
    #[must_use]
    pub const fn before(&self) -> &BTreeSet<String> {
        &self.before
    }

    /// Ids that must run before this interceptor.
    #[must_use]
    pub const fn after(&self) -> &BTreeSet<String> {
        &self.after
    }
}

/// A unit of message processing bound to one phase.
pub trait Interceptor: Send + Sync + 'static {
    /// Returns the ordering metadata.
    fn meta(&self) -> &InterceptorMeta;

    /// Returns the interceptor id.
    fn id(&self) -> &str {
        self.meta().id()
    }

    /// Returns the phase this interceptor belongs to.
    fn phase(&self) -> &str {
        self.meta().phase()
    }

    /// Ids that must run after this one.
    fn before(&self) -> &BTreeSet<String> {
        self.meta().before()
    }

    /// Ids that must run before this one.
    fn after(&self) -> &BTreeSet<String> {
        self.meta().after()
    }

    /// Processes the message.
    ///
    /// Returning `Err` stops forward iteration and unwinds the chain.
    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>>;

    /// Best-effort cleanup when a later interceptor (or this one) faulted.
    ///
    /// Must not fail; panics are caught by the chain and logged.
    fn handle_fault(&self, _message: &mut Message) {}
}

/// An interceptor backed by a synchronous closure.
///
/// # Example
///
/// ```
/// use waypoint_core::{FnInterceptor, Interceptor, InterceptorMeta};
///
/// let stamp = FnInterceptor::new(InterceptorMeta::new("stamp", "receive"), |message| {
///     message.set_property("stamped", true);
///     Ok(())
/// });
/// assert_eq!(stamp.phase(), "receive");
/// ```
pub struct FnInterceptor<F> {
    meta: InterceptorMeta,
    f: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(&mut Message) -> Result<(), Fault> + Send + Sync + 'static,
{
    /// Creates an interceptor from a closure.
    pub const fn new(meta: InterceptorMeta, f: F) -> Self {
        Self { meta, f }
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&mut Message) -> Result<(), Fault> + Send + Sync + 'static,
{
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        let result = (self.f)(message);
        Box::pin(std::future::ready(result))
    }
}

impl<F> fmt::Debug for FnInterceptor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInterceptor")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker;

    #[test]
    fn test_meta_builder() {
        let meta = InterceptorMeta::new("a", "read")
            .add_before("b")
            .add_before("c")
            .add_after("z");
        assert_eq!(meta.id(), "a");
        assert_eq!(meta.phase(), "read");
        assert_eq!(meta.before().len(), 2);
        assert!(meta.after().contains("z"));
    }

    #[test]
    fn test_for_type_uses_type_name() {
        let meta = InterceptorMeta::for_type::<Marker>("invoke");
        assert!(meta.id().ends_with("Marker"));
        assert_eq!(meta.with_id("custom").id(), "custom");
    }

    #[tokio::test]
    async fn test_fn_interceptor() {
        let interceptor = FnInterceptor::new(InterceptorMeta::new("flag", "receive"), |message| {
            message.set_property("seen", true);
            Ok(())
        });

        let mut message = Message::inbound();
        interceptor.handle_message(&mut message).await.unwrap();
        assert_eq!(message.property("seen"), Some(&serde_json::Value::Bool(true)));

        // default handle_fault is a no-op
        interceptor.handle_fault(&mut message);
    }

    #[tokio::test]
    async fn test_fn_interceptor_fault() {
        let interceptor = FnInterceptor::new(InterceptorMeta::new("reject", "receive"), |_| {
            Err(Fault::client("rejected"))
        });
        let mut message = Message::inbound();
        let fault = interceptor.handle_message(&mut message).await.unwrap_err();
        assert_eq!(fault.message(), "rejected");
    }
}

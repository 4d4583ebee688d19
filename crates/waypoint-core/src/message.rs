//! Messages: the per-leg property bag every interceptor reads and writes.
//!
//! A [`Message`] carries raw bytes, parsed content keyed by type, protocol
//! headers, string-keyed properties and a back-reference to its
//! [`Exchange`] and to the chain currently driving it.

use crate::chain::InterceptorChain;
use crate::exchange::{Exchange, Leg};
use crate::fault::{Fault, FaultDescriptor, FaultMode};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A unique identifier for a message, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Which leg of the exchange a message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Request on a server, response on a client.
    Inbound,
    /// Response on a server, request on a client.
    Outbound,
    /// Inbound fault.
    InboundFault,
    /// Outbound fault.
    OutboundFault,
}

impl MessageRole {
    /// Returns the exchange leg this role occupies.
    #[must_use]
    pub const fn leg(self) -> Leg {
        match self {
            Self::Inbound => Leg::In,
            Self::Outbound => Leg::Out,
            Self::InboundFault => Leg::InFault,
            Self::OutboundFault => Leg::OutFault,
        }
    }

    /// Returns true for fault roles.
    #[must_use]
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::InboundFault | Self::OutboundFault)
    }
}

/// A single leg of an exchange.
///
/// Messages are exclusively owned by one in-flight chain. They move into the
/// chain on `do_intercept`, are parked inside it while paused, and come back
/// out in the [`ChainOutcome`](crate::ChainOutcome).
pub struct Message {
    id: MessageId,
    role: MessageRole,
    exchange: Arc<Exchange>,
    properties: HashMap<String, Value>,
    contents: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    payload: Option<Bytes>,
    headers: HeaderMap,
    exception: Option<anyhow::Error>,
    fault_mode: Option<FaultMode>,
    requestor: bool,
    chain: Option<Arc<dyn InterceptorChain>>,
}

impl Message {
    /// Creates a message for the given leg and records it on the exchange.
    #[must_use]
    pub fn new(exchange: Arc<Exchange>, role: MessageRole) -> Self {
        let id = MessageId::new();
        exchange.set_leg(role.leg(), id);
        Self {
            id,
            role,
            exchange,
            properties: HashMap::new(),
            contents: HashMap::new(),
            payload: None,
            headers: HeaderMap::new(),
            exception: None,
            fault_mode: None,
            requestor: false,
            chain: None,
        }
    }

    /// Creates an inbound message on a fresh exchange.
    #[must_use]
    pub fn inbound() -> Self {
        Self::new(Arc::new(Exchange::new()), MessageRole::Inbound)
    }

    /// Returns the message id.
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the role of this message.
    #[must_use]
    pub const fn role(&self) -> MessageRole {
        self.role
    }

    /// Returns the owning exchange.
    #[must_use]
    pub fn exchange(&self) -> &Arc<Exchange> {
        &self.exchange
    }

    /// Returns true if the exchange is one-way.
    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.exchange.is_one_way()
    }

    /// Returns true on the client (requesting) side.
    #[must_use]
    pub const fn is_requestor(&self) -> bool {
        self.requestor
    }

    /// Marks this message as belonging to the requesting side.
    pub fn set_requestor(&mut self, requestor: bool) {
        self.requestor = requestor;
    }

    // Properties

    /// Returns a message property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Sets a message property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Removes a message property.
    pub fn remove_property(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    /// Looks a property up on the message, then on the exchange.
    #[must_use]
    pub fn contextual_property(&self, key: &str) -> Option<Value> {
        self.properties
            .get(key)
            .cloned()
            .or_else(|| self.exchange.property(key))
    }

    /// Interprets a contextual property as a flag.
    ///
    /// Accepts JSON booleans and the strings `true`/`false` (any case).
    #[must_use]
    pub fn contextual_flag(&self, key: &str) -> bool {
        match self.contextual_property(key) {
            Some(Value::Bool(flag)) => flag,
            Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    // Typed content

    /// Stores typed content, replacing any previous value of the same type.
    pub fn set_content<T: Send + Sync + 'static>(&mut self, value: T) {
        self.contents.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns typed content.
    #[must_use]
    pub fn content<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.contents
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    /// Returns mutable typed content.
    pub fn content_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.contents
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut::<T>())
    }

    /// Removes and returns typed content.
    pub fn take_content<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.contents
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Looks a typed value up in message content, then in exchange extensions.
    #[must_use]
    pub fn contextual_content<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.content::<T>()
            .cloned()
            .or_else(|| self.exchange.extension::<T>())
    }

    // Raw payload and headers

    /// Returns the raw payload.
    #[must_use]
    pub const fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Sets the raw payload.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = Some(payload.into());
    }

    /// Removes the raw payload.
    pub fn take_payload(&mut self) -> Option<Bytes> {
        self.payload.take()
    }

    /// Returns the protocol headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the protocol headers mutably.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns the content type header, if present and valid UTF-8.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    // Faults

    /// Returns the exception carried by this message.
    #[must_use]
    pub const fn exception(&self) -> Option<&anyhow::Error> {
        self.exception.as_ref()
    }

    /// Returns the carried exception if it is a [`Fault`].
    #[must_use]
    pub fn fault(&self) -> Option<&Fault> {
        self.exception
            .as_ref()
            .and_then(|error| error.downcast_ref::<Fault>())
    }

    /// Stores an exception on this message.
    pub fn set_exception(&mut self, error: impl Into<anyhow::Error>) {
        self.exception = Some(error.into());
    }

    /// Removes the carried exception.
    pub fn take_exception(&mut self) -> Option<anyhow::Error> {
        self.exception.take()
    }

    /// Returns the fault mode, if one was set.
    #[must_use]
    pub const fn fault_mode(&self) -> Option<FaultMode> {
        self.fault_mode
    }

    /// Sets the fault mode.
    pub fn set_fault_mode(&mut self, mode: FaultMode) {
        self.fault_mode = Some(mode);
    }

    /// Returns the binding fault descriptor, if one is attached.
    #[must_use]
    pub fn fault_descriptor(&self) -> Option<&FaultDescriptor> {
        self.content::<FaultDescriptor>()
    }

    // Chain

    /// Returns the chain currently driving this message.
    #[must_use]
    pub fn interceptor_chain(&self) -> Option<Arc<dyn InterceptorChain>> {
        self.chain.clone()
    }

    /// Sets the chain driving this message.
    pub fn set_interceptor_chain(&mut self, chain: Arc<dyn InterceptorChain>) {
        self.chain = Some(chain);
    }

    /// Detaches the chain from this message.
    pub fn clear_interceptor_chain(&mut self) -> Option<Arc<dyn InterceptorChain>> {
        self.chain.take()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("exchange", &self.exchange.id())
            .field("properties", &self.properties)
            .field("contents", &self.contents.len())
            .field("payload_len", &self.payload.as_ref().map(Bytes::len))
            .field("headers", &self.headers)
            .field("exception", &self.exception)
            .field("fault_mode", &self.fault_mode)
            .field("requestor", &self.requestor)
            .field("has_chain", &self.chain.is_some())
            .finish()
    }
}

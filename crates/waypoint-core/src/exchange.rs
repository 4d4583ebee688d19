//! The exchange: one logical request/response pair.

use crate::message::MessageId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// A unique identifier for an exchange, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    /// Creates a new time-ordered exchange id.
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

impl Default for ExchangeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ExchangeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// One side of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    /// The inbound message.
    In,
    /// The outbound message.
    Out,
    /// The inbound fault message.
    InFault,
    /// The outbound fault message.
    OutFault,
}

impl Leg {
    const fn slot(self) -> usize {
        match self {
            Self::In => 0,
            Self::Out => 1,
            Self::InFault => 2,
            Self::OutFault => 3,
        }
    }
}

/// Groups the inbound, outbound and fault messages of one logical call.
///
/// Exchange-scoped state is shared by both legs, so it sits behind interior
/// locks and the exchange itself is passed around as `Arc<Exchange>`. Legs are
/// recorded by message id; the messages themselves are owned by whichever
/// chain is processing them.
///
/// Typed extensions carry collaborators such as the endpoint, the destination
/// or the current executor.
pub struct Exchange {
    id: ExchangeId,
    one_way: AtomicBool,
    properties: RwLock<HashMap<String, Value>>,
    extensions: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    legs: RwLock<[Option<MessageId>; 4]>,
}

impl Exchange {
    /// Creates an empty two-way exchange.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ExchangeId::new(),
            one_way: AtomicBool::new(false),
            properties: RwLock::new(HashMap::new()),
            extensions: RwLock::new(HashMap::new()),
            legs: RwLock::new([None; 4]),
        }
    }

    /// Returns the exchange id.
    #[must_use]
    pub const fn id(&self) -> ExchangeId {
        self.id
    }

    /// Returns true if no logical response is expected.
    #[must_use]
    pub fn is_one_way(&self) -> bool {
        self.one_way.load(Ordering::Acquire)
    }

    /// Marks the exchange as one-way or two-way.
    pub fn set_one_way(&self, one_way: bool) {
        self.one_way.store(one_way, Ordering::Release);
    }

    /// Returns a copy of an exchange property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.read().get(key).cloned()
    }

    /// Sets an exchange property.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.write().insert(key.into(), value.into());
    }

    /// Removes an exchange property.
    pub fn remove_property(&self, key: &str) -> Option<Value> {
        self.properties.write().remove(key)
    }

    /// Stores a typed extension, replacing any previous value of the same type.
    pub fn set_extension<T: Clone + Send + Sync + 'static>(&self, value: T) {
        self.extensions
            .write()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a clone of a typed extension.
    #[must_use]
    pub fn extension<T: Clone + Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
    }

    /// Returns true if an extension of this type is present.
    #[must_use]
    pub fn has_extension<T: 'static>(&self) -> bool {
        self.extensions.read().contains_key(&TypeId::of::<T>())
    }

    /// Removes a typed extension.
    pub fn remove_extension<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.extensions
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Returns the id of the message currently representing a leg.
    #[must_use]
    pub fn leg(&self, leg: Leg) -> Option<MessageId> {
        self.legs.read()[leg.slot()]
    }

    /// Records the message representing a leg, replacing any previous one.
    pub fn set_leg(&self, leg: Leg, message: MessageId) {
        self.legs.write()[leg.slot()] = Some(message);
    }

    /// Clears a leg.
    pub fn clear_leg(&self, leg: Leg) {
        self.legs.write()[leg.slot()] = None;
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("id", &self.id)
            .field("one_way", &self.is_one_way())
            .field("properties", &self.properties.read().len())
            .field("extensions", &self.extensions.read().len())
            .field("legs", &*self.legs.read())
            .finish()
    }
}

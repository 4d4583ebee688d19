//! Faults: the recoverable error object that unwinds a chain.
//!
//! A [`Fault`] is what an interceptor returns from `handle_message` when it
//! cannot continue. The chain catches it, unwinds, stores it on the message and
//! hands the message to its fault observer, which builds the fault response.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Which party a fault is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCode {
    /// The request was bad.
    Sender,
    /// The receiving side failed.
    Receiver,
    /// Binding-specific code.
    Custom(String),
}

impl FaultCode {
    /// Default status code for this fault code.
    #[must_use]
    pub const fn default_status(&self) -> u16 {
        match self {
            Self::Sender => 400,
            Self::Receiver | Self::Custom(_) => 500,
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => write!(f, "sender"),
            Self::Receiver => write!(f, "receiver"),
            Self::Custom(code) => write!(f, "{code}"),
        }
    }
}

/// How a fault should be treated by logging and fault interceptors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultMode {
    /// Runtime failure in the framework.
    RuntimeFault,
    /// Runtime failure raised by a logical handler.
    LogicalRuntimeFault,
    /// Declared application fault.
    CheckedApplicationFault,
    /// Undeclared application fault.
    #[default]
    UncheckedApplicationFault,
}

impl FaultMode {
    /// Returns true for declared application faults.
    #[must_use]
    pub const fn is_checked(self) -> bool {
        matches!(self, Self::CheckedApplicationFault)
    }
}

/// Binding-specific description of a fault already attached to a message.
///
/// Fault chains copy it onto the fault message so that the binding's fault
/// interceptors can render a protocol-appropriate response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDescriptor {
    /// Descriptor name, e.g. a declared fault type.
    pub name: String,
    /// Free-form binding attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl FaultDescriptor {
    /// Creates a descriptor with no attributes.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// A recoverable, protocol-level error carrying optional structured detail.
///
/// # Example
///
/// ```
/// use waypoint_core::{Fault, FaultCode};
///
/// let fault = Fault::client("missing field 'id'").with_status(422);
/// assert_eq!(fault.code(), &FaultCode::Sender);
/// assert_eq!(fault.status_code(), 422);
/// ```
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct Fault {
    message: String,
    code: FaultCode,
    detail: Option<Value>,
    status: Option<u16>,
    #[source]
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl Fault {
    /// Creates a fault with the given code.
    #[must_use]
    pub fn new(code: FaultCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            detail: None,
            status: None,
            cause: None,
        }
    }

    /// Creates a receiver-side fault.
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Receiver, message)
    }

    /// Creates a sender-side fault.
    #[must_use]
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(FaultCode::Sender, message)
    }

    /// Normalizes an arbitrary error into a fault.
    ///
    /// An error that already is a `Fault` is returned unchanged; anything else
    /// becomes a receiver fault whose cause is the original error.
    #[must_use]
    pub fn from_error(err: anyhow::Error) -> Self {
        match err.downcast::<Self>() {
            Ok(fault) => fault,
            Err(err) => {
                let message = err.to_string();
                let cause: Box<dyn StdError + Send + Sync + 'static> = err.into();
                Self::server(message).with_cause(Arc::from(cause))
            }
        }
    }

    /// Attaches a structured detail payload.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Overrides the status code.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches the underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: Arc<dyn StdError + Send + Sync + 'static>) -> Self {
        self.cause = Some(cause);
        self
    }

    /// Returns the fault message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the fault code.
    #[must_use]
    pub const fn code(&self) -> &FaultCode {
        &self.code
    }

    /// Returns the detail payload, if any.
    #[must_use]
    pub const fn detail(&self) -> Option<&Value> {
        self.detail.as_ref()
    }

    /// Returns the status code, derived from the fault code unless overridden.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self.status {
            Some(status) => status,
            None => self.code.default_status(),
        }
    }

    /// Returns the underlying cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl From<anyhow::Error> for Fault {
    fn from(err: anyhow::Error) -> Self {
        Self::from_error(err)
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Self::client(format!("malformed payload: {err}")).with_cause(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_default_status() {
        assert_eq!(Fault::server("x").status_code(), 500);
        assert_eq!(Fault::client("x").status_code(), 400);
        assert_eq!(Fault::server("x").with_status(503).status_code(), 503);
    }

    #[test]
    fn test_from_error_keeps_fault() {
        let original = Fault::client("bad").with_detail(serde_json::json!({"field": "id"}));
        let normalized = Fault::from_error(anyhow::Error::new(original));
        assert_eq!(normalized.code(), &FaultCode::Sender);
        assert_eq!(normalized.detail().unwrap()["field"], "id");
        assert!(normalized.cause().is_none());
    }

    #[test]
    fn test_from_error_wraps_other() {
        let err = anyhow::Error::new(io::Error::new(io::ErrorKind::Other, "disk gone"));
        let fault = Fault::from(err);
        assert_eq!(fault.code(), &FaultCode::Receiver);
        assert_eq!(fault.message(), "disk gone");
        assert!(fault.cause().is_some());
        assert!(StdError::source(&fault).is_some());
    }

    #[test]
    fn test_fault_mode_default() {
        assert_eq!(FaultMode::default(), FaultMode::UncheckedApplicationFault);
        assert!(FaultMode::CheckedApplicationFault.is_checked());
        assert!(!FaultMode::RuntimeFault.is_checked());
    }

    #[test]
    fn test_fault_code_display() {
        assert_eq!(FaultCode::Sender.to_string(), "sender");
        assert_eq!(FaultCode::Custom("VersionMismatch".into()).to_string(), "VersionMismatch");
    }

    #[test]
    fn test_descriptor_builder() {
        let descriptor = FaultDescriptor::new("OrderRejected").with_attribute("ns", "urn:orders");
        assert_eq!(descriptor.attributes.get("ns").map(String::as_str), Some("urn:orders"));
    }

    #[test]
    fn test_json_error_is_client_fault() {
        let err = serde_json::from_str::<Value>("{").unwrap_err();
        let fault = Fault::from(err);
        assert_eq!(fault.code(), &FaultCode::Sender);
        assert!(fault.message().starts_with("malformed payload"));
    }
}

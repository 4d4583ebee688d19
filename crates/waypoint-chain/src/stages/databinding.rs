//! Marshalling stages backed by a [`DataBinding`].

use std::sync::Arc;

use bytes::BytesMut;
use http::header::CONTENT_TYPE;
use http::HeaderValue;
use serde_json::{json, Value};
use waypoint_core::phase::names;
use waypoint_core::{BoxFuture, Fault, Interceptor, InterceptorMeta, Message};

use crate::databinding::{DataBinding, JsonDataBinding};
use crate::transport::RESPONSE_CODE;

/// Reads the inbound payload into a [`Value`] stored as message content.
pub struct DataBindingInInterceptor {
    meta: InterceptorMeta,
    binding: Arc<dyn DataBinding>,
    part: Option<String>,
}

impl DataBindingInInterceptor {
    /// Interceptor id.
    pub const ID: &'static str = "data-binding-in";

    /// Creates the interceptor in the unmarshal phase.
    pub fn new(binding: Arc<dyn DataBinding>, part: Option<&str>) -> Self {
        Self {
            meta: InterceptorMeta::new(Self::ID, names::UNMARSHAL),
            binding,
            part: part.map(str::to_string),
        }
    }
}

impl Interceptor for DataBindingInInterceptor {
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        let parsed = match message.payload() {
            Some(payload) if !payload.is_empty() => Some(
                self.binding
                    .create_reader()
                    .read(self.part.as_deref(), payload),
            ),
            _ => None,
        };
        let result = match parsed {
            Some(Ok(value)) => {
                message.set_content::<Value>(value);
                Ok(())
            }
            Some(Err(fault)) => Err(fault),
            None => Ok(()),
        };
        Box::pin(std::future::ready(result))
    }
}

/// Writes the outbound [`Value`] content into the payload.
pub struct DataBindingOutInterceptor {
    meta: InterceptorMeta,
    binding: Arc<dyn DataBinding>,
    part: Option<String>,
}

impl DataBindingOutInterceptor {
    /// Interceptor id.
    pub const ID: &'static str = "data-binding-out";

    /// Creates the interceptor in the marshal phase.
    pub fn new(binding: Arc<dyn DataBinding>, part: Option<&str>) -> Self {
        Self {
            meta: InterceptorMeta::new(Self::ID, names::MARSHAL),
            binding,
            part: part.map(str::to_string),
        }
    }

    fn marshal(&self, message: &mut Message) -> Result<(), Fault> {
        let Some(value) = message.content::<Value>() else {
            return Ok(());
        };
        let mut sink = BytesMut::new();
        self.binding
            .create_writer()
            .write(value, self.part.as_deref(), &mut sink)?;
        message.set_payload(sink.freeze());
        if message.content_type().is_none() {
            if let Ok(content_type) = HeaderValue::from_str(self.binding.content_type()) {
                message.headers_mut().insert(CONTENT_TYPE, content_type);
            }
        }
        Ok(())
    }
}

impl Interceptor for DataBindingOutInterceptor {
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(std::future::ready(self.marshal(message)))
    }
}

/// Writes the carried [`Fault`] as a JSON document and sets the status.
///
/// ```json
/// {"fault": {"code": "sender", "message": "...", "detail": {...}}}
/// ```
#[derive(Debug)]
pub struct FaultOutInterceptor {
    meta: InterceptorMeta,
}

impl FaultOutInterceptor {
    /// Interceptor id.
    pub const ID: &'static str = "fault-out";

    /// Creates the interceptor in the marshal phase.
    #[must_use]
    pub fn new() -> Self {
        Self {
            meta: InterceptorMeta::new(Self::ID, names::MARSHAL),
        }
    }

    fn document(fault: &Fault) -> Value {
        let mut body = json!({
            "code": fault.code().to_string(),
            "message": fault.message(),
        });
        if let Some(detail) = fault.detail() {
            body["detail"] = detail.clone();
        }
        json!({ "fault": body })
    }

    fn write_fault(message: &mut Message) -> Result<(), Fault> {
        let Some(fault) = message.fault().cloned() else {
            return Ok(());
        };
        let body = serde_json::to_vec(&Self::document(&fault))
            .map_err(|e| Fault::server(format!("failed to write fault: {e}")))?;
        message.set_payload(body);
        message.set_property(RESPONSE_CODE, fault.status_code());
        message.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static(JsonDataBinding::CONTENT_TYPE),
        );
        Ok(())
    }
}

impl Default for FaultOutInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for FaultOutInterceptor {
    fn meta(&self) -> &InterceptorMeta {
        &self.meta
    }

    fn handle_message<'a>(&'a self, message: &'a mut Message) -> BoxFuture<'a, Result<(), Fault>> {
        Box::pin(std::future::ready(Self::write_fault(message)))
    }
}

//! Data binding seam: mapping payload bytes to and from structured values.
//!
//! The chain only ever calls [`DataReader::read`] and [`DataWriter::write`];
//! any failure becomes a [`Fault`] and takes the normal unwind path.

use bytes::BytesMut;
use serde_json::Value;
use waypoint_core::Fault;

/// Reads a structured value out of a payload.
pub trait DataReader: Send + Sync {
    /// Reads `part` (or the whole document) from `source`.
    fn read(&self, part: Option<&str>, source: &[u8]) -> Result<Value, Fault>;
}

/// Writes a structured value into a payload.
pub trait DataWriter: Send + Sync {
    /// Writes `value` as `part` (or as the whole document) into `sink`.
    fn write(&self, value: &Value, part: Option<&str>, sink: &mut BytesMut) -> Result<(), Fault>;
}

/// A pair of reader and writer plus the media type they speak.
pub trait DataBinding: Send + Sync {
    /// Creates a reader.
    fn create_reader(&self) -> Box<dyn DataReader>;

    /// Creates a writer.
    fn create_writer(&self) -> Box<dyn DataWriter>;

    /// Media type of written payloads.
    fn content_type(&self) -> &str;
}

/// `serde_json` data binding.
///
/// A part names a top-level field of a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDataBinding;

impl JsonDataBinding {
    /// Media type written by this binding.
    pub const CONTENT_TYPE: &'static str = "application/json";
}

impl DataBinding for JsonDataBinding {
    fn create_reader(&self) -> Box<dyn DataReader> {
        Box::new(JsonReader)
    }

    fn create_writer(&self) -> Box<dyn DataWriter> {
        Box::new(JsonWriter)
    }

    fn content_type(&self) -> &str {
        Self::CONTENT_TYPE
    }
}

struct JsonReader;

impl DataReader for JsonReader {
    fn read(&self, part: Option<&str>, source: &[u8]) -> Result<Value, Fault> {
        let document: Value = serde_json::from_slice(source)?;
        match part {
            None => Ok(document),
            Some(part) => match document {
                Value::Object(mut fields) => fields
                    .remove(part)
                    .ok_or_else(|| Fault::client(format!("missing part '{part}'"))),
                _ => Err(Fault::client(format!(
                    "expected an object holding part '{part}'"
                ))),
            },
        }
    }
}

struct JsonWriter;

impl DataWriter for JsonWriter {
    fn write(&self, value: &Value, part: Option<&str>, sink: &mut BytesMut) -> Result<(), Fault> {
        let encoded = match part {
            None => serde_json::to_vec(value),
            Some(part) => {
                let mut wrapper = serde_json::Map::new();
                wrapper.insert(part.to_string(), value.clone());
                serde_json::to_vec(&Value::Object(wrapper))
            }
        }
        .map_err(|e| Fault::server(format!("failed to write payload: {e}")))?;
        sink.extend_from_slice(&encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waypoint_core::FaultCode;

    #[test]
    fn test_read_whole_document() {
        let reader = JsonDataBinding.create_reader();
        let value = reader.read(None, br#"{"a":1}"#).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_read_part() {
        let reader = JsonDataBinding.create_reader();
        let value = reader.read(Some("order"), br#"{"order":{"id":7}}"#).unwrap();
        assert_eq!(value, json!({"id": 7}));

        let missing = reader.read(Some("other"), br#"{"order":1}"#).unwrap_err();
        assert_eq!(missing.code(), &FaultCode::Sender);
    }

    #[test]
    fn test_malformed_input_is_client_fault() {
        let reader = JsonDataBinding.create_reader();
        let fault = reader.read(None, b"{not json").unwrap_err();
        assert_eq!(fault.code(), &FaultCode::Sender);
    }

    #[test]
    fn test_write_part() {
        let writer = JsonDataBinding.create_writer();
        let mut sink = BytesMut::new();
        writer.write(&json!(3), Some("total"), &mut sink).unwrap();
        let written: Value = serde_json::from_slice(&sink).unwrap();
        assert_eq!(written, json!({"total": 3}));
    }
}

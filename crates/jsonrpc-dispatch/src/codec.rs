//! Serializer boundary between raw frames and decoded values.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::error::CodecError;
use crate::response::JsonRpcMessage;

/// Converts frames to and from decoded values.
///
/// The dispatch core only ever sees `serde_json::Value`; an alternative wire
/// encoding plugs in here.
pub trait Codec: Send + Sync + 'static {
    fn decode(&self, frame: &[u8]) -> Result<Value, CodecError>;

    fn encode(&self, value: &Value) -> Result<Bytes, CodecError>;

    /// MIME type adapters advertise for encoded frames
    fn content_type(&self) -> &'static str;

    fn encode_message(&self, message: &JsonRpcMessage) -> Result<Bytes, CodecError> {
        self.encode(&to_value(message)?)
    }

    fn encode_batch(&self, messages: &[JsonRpcMessage]) -> Result<Bytes, CodecError> {
        self.encode(&to_value(messages)?)
    }
}

/// UTF-8 JSON text frames
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, frame: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(frame).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, CodecError> {
    serde_json::to_value(value).map_err(|e| CodecError::Encode(e.to_string()))
}

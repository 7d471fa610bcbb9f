//! Envelope classification
//!
//! Turns a decoded value into a request, notification, response, batch or a
//! malformed envelope. Pure and synchronous; nothing here touches a handler.

use serde_json::{Map, Value};

use crate::error::JsonRpcError;
use crate::notification::JsonRpcNotification;
use crate::request::{JsonRpcRequest, RequestParams};
use crate::response::JsonRpcMessage;
use crate::types::{JsonRpcVersion, RequestId};

/// A call the dispatcher can execute
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl Call {
    pub fn method(&self) -> &str {
        match self {
            Call::Request(req) => &req.method,
            Call::Notification(notif) => &notif.method,
        }
    }

    pub fn params(&self) -> Option<&RequestParams> {
        match self {
            Call::Request(req) => req.params.as_ref(),
            Call::Notification(notif) => notif.params.as_ref(),
        }
    }

    /// The request id, `None` for a notification
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Call::Request(req) => Some(&req.id),
            Call::Notification(_) => None,
        }
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, Call::Notification(_))
    }

    pub fn into_parts(self) -> (String, Option<RequestParams>, Option<RequestId>) {
        match self {
            Call::Request(req) => (req.method, req.params, Some(req.id)),
            Call::Notification(notif) => (notif.method, notif.params, None),
        }
    }

    pub fn to_value(&self) -> Value {
        let encoded = match self {
            Call::Request(req) => serde_json::to_value(req),
            Call::Notification(notif) => serde_json::to_value(notif),
        };
        // Both types serialize to plain objects of owned values.
        encoded.unwrap_or(Value::Null)
    }
}

impl From<JsonRpcRequest> for Call {
    fn from(request: JsonRpcRequest) -> Self {
        Call::Request(request)
    }
}

impl From<JsonRpcNotification> for Call {
    fn from(notification: JsonRpcNotification) -> Self {
        Call::Notification(notification)
    }
}

/// One classified message (a top-level object or a batch element)
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Call(Call),
    /// Response-shaped frame; only meaningful to a peer that issued calls
    Response(JsonRpcMessage),
    /// Not a well-formed message; carries the reason
    Malformed(String),
}

/// Result of classifying a decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Single(Incoming),
    Batch(Vec<Incoming>),
    /// Rejected as a whole: not an object or array, or an empty array
    Invalid(JsonRpcError),
}

/// Classify a decoded value.
pub fn classify(value: Value) -> Envelope {
    match value {
        Value::Object(obj) => Envelope::Single(classify_object(obj)),
        Value::Array(items) if items.is_empty() => {
            Envelope::Invalid(JsonRpcError::invalid_request(None))
        }
        Value::Array(items) => Envelope::Batch(items.into_iter().map(classify_element).collect()),
        _ => Envelope::Invalid(JsonRpcError::invalid_request(None)),
    }
}

/// Classify one batch element.
pub fn classify_element(value: Value) -> Incoming {
    match value {
        Value::Object(obj) => classify_object(obj),
        Value::Array(_) => Incoming::Malformed("nested batches are not allowed".to_string()),
        other => Incoming::Malformed(format!("expected an object, got {}", type_name(&other))),
    }
}

fn classify_object(mut obj: Map<String, Value>) -> Incoming {
    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == crate::JSONRPC_VERSION => {}
        Some(other) => {
            return Incoming::Malformed(format!("unsupported jsonrpc version {}", other));
        }
        None => return Incoming::Malformed("missing jsonrpc version".to_string()),
    }

    let id = match obj.remove("id") {
        None => None,
        Some(raw) => match RequestId::from_value(&raw) {
            Some(id) => Some(id),
            None => {
                return Incoming::Malformed(format!(
                    "id must be a string, number or null, got {}",
                    type_name(&raw)
                ));
            }
        },
    };

    let method = match obj.remove("method") {
        Some(Value::String(method)) => method,
        Some(other) => {
            return Incoming::Malformed(format!(
                "method must be a string, got {}",
                type_name(&other)
            ));
        }
        None => return classify_response(obj, id),
    };

    let params = match obj.remove("params") {
        None => None,
        Some(raw) => {
            let kind = type_name(&raw);
            match RequestParams::from_value(raw) {
                Some(params) => Some(params),
                None => {
                    return Incoming::Malformed(format!(
                        "params must be an array or an object, got {}",
                        kind
                    ));
                }
            }
        }
    };

    let call = match id {
        Some(id) => Call::Request(JsonRpcRequest {
            version: JsonRpcVersion::V2_0,
            method,
            params,
            id,
        }),
        None => Call::Notification(JsonRpcNotification {
            version: JsonRpcVersion::V2_0,
            method,
            params,
        }),
    };
    Incoming::Call(call)
}

fn classify_response(mut obj: Map<String, Value>, id: Option<RequestId>) -> Incoming {
    let Some(id) = id else {
        return Incoming::Malformed("missing method".to_string());
    };

    match (obj.remove("result"), obj.remove("error")) {
        (Some(result), None) => Incoming::Response(JsonRpcMessage::success(id, result)),
        (None, Some(error)) => match serde_json::from_value(error) {
            Ok(error) => Incoming::Response(JsonRpcMessage::error(JsonRpcError::new(id, error))),
            Err(e) => Incoming::Malformed(format!("malformed error object: {}", e)),
        },
        (Some(_), Some(_)) => {
            Incoming::Malformed("response carries both result and error".to_string())
        }
        (None, None) => Incoming::Malformed("missing method".to_string()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

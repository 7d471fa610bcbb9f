use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HandlerError;
use crate::types::{JsonRpcVersion, ParamsShape, RequestId};

/// Parameters for a JSON-RPC call
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequestParams {
    /// Positional parameters as an array
    Array(Vec<Value>),
    /// Named parameters as an object
    Object(Map<String, Value>),
}

impl RequestParams {
    /// Build params from a decoded value; scalars and `null` are not params.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(RequestParams::Array(items)),
            Value::Object(map) => Some(RequestParams::Object(map)),
            _ => None,
        }
    }

    pub fn shape(&self) -> ParamsShape {
        match self {
            RequestParams::Array(_) => ParamsShape::Positional,
            RequestParams::Object(_) => ParamsShape::Named,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RequestParams::Object(map) => Value::Object(map.clone()),
            RequestParams::Array(arr) => Value::Array(arr.clone()),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            RequestParams::Object(map) => Value::Object(map),
            RequestParams::Array(arr) => Value::Array(arr),
        }
    }

    /// Deserialize the params into a typed value.
    ///
    /// A mismatch is reported as an Invalid params failure so handlers can
    /// propagate it with `?`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(self.to_value())
            .map_err(|e| HandlerError::invalid_params(format!("Invalid params: {}", e)))
    }
}

impl From<Map<String, Value>> for RequestParams {
    fn from(map: Map<String, Value>) -> Self {
        RequestParams::Object(map)
    }
}

impl From<Vec<Value>> for RequestParams {
    fn from(vec: Vec<Value>) -> Self {
        RequestParams::Array(vec)
    }
}

/// Shape of an optional params member.
pub fn params_shape(params: Option<&RequestParams>) -> ParamsShape {
    params.map_or(ParamsShape::Absent, RequestParams::shape)
}

/// A JSON-RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
    pub id: RequestId,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<RequestParams>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
            id,
        }
    }

    /// Create a new request with no parameters
    pub fn new_no_params(id: RequestId, method: impl Into<String>) -> Self {
        Self::new(id, method, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{from_str, json, to_string};

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new_no_params(RequestId::from(1i64), "test_method");

        let json = to_string(&request).unwrap();
        let parsed: JsonRpcRequest = from_str(&json).unwrap();

        assert_eq!(parsed, request);
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_request_with_null_id_keeps_id() {
        let request = JsonRpcRequest::new_no_params(RequestId::Null, "ping");
        let json = to_string(&request).unwrap();
        assert!(json.contains("\"id\":null"));
    }

    #[test]
    fn test_request_wire_shape() {
        let params = RequestParams::from_value(json!({"name": "test", "value": 42}));
        let request = JsonRpcRequest::new(RequestId::from("req1"), "set_value", params);

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"jsonrpc": "2.0", "method": "set_value", "params": {"name": "test", "value": 42}, "id": "req1"})
        );
    }

    #[test]
    fn test_params_shape() {
        assert_eq!(params_shape(None), ParamsShape::Absent);
        assert_eq!(
            params_shape(Some(&RequestParams::Array(vec![]))),
            ParamsShape::Positional
        );
        assert_eq!(
            params_shape(Some(&RequestParams::Object(Map::new()))),
            ParamsShape::Named
        );
        assert!(RequestParams::from_value(json!(5)).is_none());
        assert!(RequestParams::from_value(Value::Null).is_none());
    }

    #[test]
    fn test_params_parse() {
        #[derive(Debug, serde::Deserialize)]
        struct Pair {
            a: i64,
            b: i64,
        }

        let named = RequestParams::from_value(json!({"a": 1, "b": 2})).unwrap();
        let pair: Pair = named.parse().unwrap();
        assert_eq!(pair.a + pair.b, 3);

        let positional = RequestParams::from_value(json!([4, 5])).unwrap();
        let (a, b): (i64, i64) = positional.parse().unwrap();
        assert_eq!(a * b, 20);

        let short = RequestParams::from_value(json!([1])).unwrap();
        let err = short.parse::<Pair>().unwrap_err();
        assert_eq!(err.code, crate::error_codes::INVALID_PARAMS);

        let wrong_type = RequestParams::from_value(json!({"a": "x", "b": 2})).unwrap();
        let err = wrong_type.parse::<Pair>().unwrap_err();
        assert_eq!(err.code, crate::error_codes::INVALID_PARAMS);
    }
}

//! Frame-level entry point
//!
//! `decode -> classify -> dispatch -> encode`. This is what a transport
//! adapter calls when a frame arrives.

use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::codec::{Codec, JsonCodec};
use crate::dispatcher::JsonRpcDispatcher;
use crate::envelope::{Envelope, Incoming, classify};
use crate::error::{CodecError, JsonRpcError, JsonRpcErrorObject};
use crate::handler::CallContext;
use crate::response::JsonRpcMessage;
use crate::types::RequestId;

/// What a frame produced
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Single(JsonRpcMessage),
    Batch(Vec<JsonRpcMessage>),
}

/// Dispatcher bound to a wire codec
#[derive(Clone)]
pub struct JsonRpcService<C = JsonCodec> {
    dispatcher: JsonRpcDispatcher,
    codec: C,
}

impl JsonRpcService<JsonCodec> {
    pub fn new(dispatcher: JsonRpcDispatcher) -> Self {
        Self::with_codec(dispatcher, JsonCodec)
    }
}

impl<C: Codec> JsonRpcService<C> {
    pub fn with_codec(dispatcher: JsonRpcDispatcher, codec: C) -> Self {
        Self { dispatcher, codec }
    }

    pub fn dispatcher(&self) -> &JsonRpcDispatcher {
        &self.dispatcher
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Process one inbound frame. `None` means nothing goes back on the wire.
    pub async fn handle_frame(&self, frame: &[u8], ctx: &CallContext) -> Option<Bytes> {
        let reply = match self.codec.decode(frame) {
            Ok(value) => self.handle_value(value, ctx).await?,
            Err(err) => self.decode_error_reply(&err),
        };
        Some(self.encode_reply(&reply))
    }

    /// Reply for a frame the codec could not decode
    pub fn decode_error_reply(&self, err: &CodecError) -> Reply {
        debug!("Undecodable frame: {}", err);
        let data = self
            .dispatcher
            .config()
            .verbose_errors
            .then(|| json!({"detail": err.to_string()}));
        Reply::Single(JsonRpcMessage::error(JsonRpcError::new(
            RequestId::Null,
            JsonRpcErrorObject::parse_error(data),
        )))
    }

    /// Process an already decoded frame.
    pub async fn handle_value(&self, value: Value, ctx: &CallContext) -> Option<Reply> {
        self.handle_envelope(classify(value), ctx).await
    }

    pub async fn handle_envelope(&self, envelope: Envelope, ctx: &CallContext) -> Option<Reply> {
        match envelope {
            Envelope::Invalid(err) => Some(Reply::Single(JsonRpcMessage::error(err))),
            Envelope::Single(Incoming::Call(call)) => {
                self.dispatcher.invoke(call, ctx).await.map(Reply::Single)
            }
            Envelope::Single(Incoming::Malformed(reason)) => {
                debug!("Malformed envelope: {}", reason);
                Some(Reply::Single(self.invalid_request(json!({"reason": reason}))))
            }
            Envelope::Single(Incoming::Response(response)) => {
                debug!(id = %response.id(), "Unexpected response frame");
                Some(Reply::Single(self.invalid_request(json!({
                    "reason": "unexpected response object",
                }))))
            }
            Envelope::Batch(items) => {
                if let Err(err) = self.dispatcher.check_batch_size(items.len()) {
                    return Some(Reply::Single(JsonRpcMessage::error(err)));
                }
                let replies = self.dispatcher.invoke_batch(items, ctx).await;
                (!replies.is_empty()).then_some(Reply::Batch(replies))
            }
        }
    }

    pub fn encode_reply(&self, reply: &Reply) -> Bytes {
        let encoded = match reply {
            Reply::Single(message) => self.codec.encode_message(message),
            Reply::Batch(messages) => self.codec.encode_batch(messages),
        };
        match encoded {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("Failed to encode reply: {}", err);
                self.fallback_frame()
            }
        }
    }

    fn fallback_frame(&self) -> Bytes {
        let message = JsonRpcMessage::error(JsonRpcError::internal_error(RequestId::Null, None));
        self.codec.encode_message(&message).unwrap_or_else(|err| {
            warn!("Codec cannot encode the fallback error: {}", err);
            Bytes::new()
        })
    }

    fn invalid_request(&self, detail: Value) -> JsonRpcMessage {
        let data = self.dispatcher.config().verbose_errors.then_some(detail);
        JsonRpcMessage::error(JsonRpcError::invalid_request(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::error::HandlerError;
    use crate::error_codes;
    use crate::handler::handler_fn;
    use crate::registry::ParamShapes;

    fn service(config: DispatchConfig) -> JsonRpcService {
        let dispatcher = JsonRpcDispatcher::with_config(config);
        dispatcher
            .register(
                "add",
                handler_fn(|params, _ctx| async move {
                    let (a, b): (i64, i64) = params
                        .ok_or_else(|| HandlerError::invalid_params("expected [a, b]"))?
                        .parse()?;
                    Ok(json!(a + b))
                }),
                ParamShapes::positional(),
            )
            .unwrap();
        dispatcher
            .register(
                "ping",
                handler_fn(|_params, _ctx| async move {
                    if true {
                        panic!("ping handler exploded");
                    }
                    Ok(Value::Null)
                }),
                ParamShapes::any(),
            )
            .unwrap();
        JsonRpcService::new(dispatcher)
    }

    async fn roundtrip(service: &JsonRpcService, input: &str) -> Option<Value> {
        service
            .handle_frame(input.as_bytes(), &CallContext::new())
            .await
            .map(|bytes| serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_single_request_frame() {
        let service = service(DispatchConfig::default());
        let out = roundtrip(
            &service,
            r#"{"jsonrpc":"2.0","method":"add","params":[2,3],"id":1}"#,
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"jsonrpc": "2.0", "result": 5, "id": 1}));
    }

    #[tokio::test]
    async fn test_notification_frame_yields_nothing_even_on_panic() {
        let service = service(DispatchConfig::default());
        assert!(roundtrip(&service, r#"{"jsonrpc":"2.0","method":"ping"}"#).await.is_none());
        assert!(roundtrip(&service, r#"{"jsonrpc":"2.0","method":"nope"}"#).await.is_none());
    }

    #[tokio::test]
    async fn test_batch_frame_with_missing_method() {
        let service = service(DispatchConfig::default());
        let out = roundtrip(
            &service,
            r#"[{"jsonrpc":"2.0","method":"add","params":[1,2],"id":"a"},{"jsonrpc":"2.0","method":"missing","id":"b"}]"#,
        )
        .await
        .unwrap();

        let replies = out.as_array().unwrap();
        assert_eq!(replies.len(), 2);
        let a = replies.iter().find(|r| r["id"] == "a").unwrap();
        let b = replies.iter().find(|r| r["id"] == "b").unwrap();
        assert_eq!(a["result"], 3);
        assert_eq!(b["error"]["code"], error_codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_batch_is_single_invalid_request() {
        let service = service(DispatchConfig::default());
        let out = roundtrip(&service, "[]").await.unwrap();
        assert!(out.is_object());
        assert_eq!(out["error"]["code"], error_codes::INVALID_REQUEST);
        assert!(out["id"].is_null());
    }

    #[tokio::test]
    async fn test_panic_in_request_hides_detail() {
        let service = service(DispatchConfig::default());
        let out = roundtrip(&service, r#"{"jsonrpc":"2.0","method":"ping","id":7}"#)
            .await
            .unwrap();
        assert_eq!(out["error"]["code"], error_codes::INTERNAL_ERROR);
        assert_eq!(out["id"], 7);
        assert!(!out.to_string().contains("exploded"));
    }

    #[tokio::test]
    async fn test_parse_error() {
        let service = service(DispatchConfig::default());
        for input in [r#"{"jsonrpc":"2.0","method":"foobar,"params":"bar","baz]"#, "", "\u{0}"] {
            let out = roundtrip(&service, input).await.unwrap();
            assert_eq!(out["error"]["code"], error_codes::PARSE_ERROR);
            assert!(out["id"].is_null());
        }
    }

    #[tokio::test]
    async fn test_invalid_batch_elements() {
        let service = service(DispatchConfig::default());
        let out = roundtrip(&service, "[1,2,3]").await.unwrap();
        let replies = out.as_array().unwrap();
        assert_eq!(replies.len(), 3);
        for reply in replies {
            assert_eq!(reply["error"]["code"], error_codes::INVALID_REQUEST);
            assert!(reply["id"].is_null());
        }
    }

    #[tokio::test]
    async fn test_all_notification_batch_yields_no_frame() {
        let service = service(DispatchConfig::default());
        let out = roundtrip(
            &service,
            r#"[{"jsonrpc":"2.0","method":"add","params":[1,2]},{"jsonrpc":"2.0","method":"ping"}]"#,
        )
        .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected_whole() {
        let service = service(DispatchConfig::new().max_batch_size(1));
        let out = roundtrip(
            &service,
            r#"[{"jsonrpc":"2.0","method":"add","params":[1,2],"id":1},{"jsonrpc":"2.0","method":"add","params":[1,2],"id":2}]"#,
        )
        .await
        .unwrap();
        assert!(out.is_object());
        assert_eq!(out["error"]["code"], error_codes::INVALID_REQUEST);
        assert!(out["id"].is_null());
    }

    #[tokio::test]
    async fn test_response_frame_rejected_on_unary_path() {
        let service = service(DispatchConfig::new().verbose_errors(true));
        let out = roundtrip(&service, r#"{"jsonrpc":"2.0","result":1,"id":1}"#)
            .await
            .unwrap();
        assert_eq!(out["error"]["code"], error_codes::INVALID_REQUEST);
        assert_eq!(out["error"]["data"]["reason"], "unexpected response object");
    }

    #[tokio::test]
    async fn test_scalar_frames_are_invalid_requests() {
        let service = service(DispatchConfig::default());
        for input in ["1", "\"hello\"", "null", "true"] {
            let out = roundtrip(&service, input).await.unwrap();
            assert_eq!(out["error"]["code"], error_codes::INVALID_REQUEST);
        }
    }
}

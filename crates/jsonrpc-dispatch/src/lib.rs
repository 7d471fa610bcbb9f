//! # JSON-RPC 2.0 Dispatch Core
//!
//! A transport-agnostic JSON-RPC 2.0 engine: envelope validation, method
//! routing, concurrent batch execution and error mapping. Transports only
//! move frames; everything protocol-shaped lives here.
//!
//! ## Features
//! - Strict envelope classification (requests, notifications, batches, responses)
//! - Method registry with per-method params shapes and declared error codes
//! - Handler panics and timeouts isolated per call
//! - Concurrent batches with input-ordered responses
//! - Duplex peers that can issue calls back over the same connection
//!
//! ```rust
//! use jsonrpc_dispatch::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let dispatcher = JsonRpcDispatcher::new();
//! dispatcher
//!     .register(
//!         "add",
//!         handler_fn(|params, _ctx| async move {
//!             let (a, b): (i64, i64) = params
//!                 .ok_or_else(|| HandlerError::invalid_params("expected [a, b]"))?
//!                 .parse()?;
//!             Ok(json!(a + b))
//!         }),
//!         ParamShapes::positional(),
//!     )
//!     .unwrap();
//!
//! let service = JsonRpcService::new(dispatcher);
//! let frame = br#"{"jsonrpc":"2.0","method":"add","params":[2,3],"id":1}"#;
//! let reply = service.handle_frame(frame, &CallContext::new()).await.unwrap();
//! let reply: serde_json::Value = serde_json::from_slice(&reply).unwrap();
//! assert_eq!(reply, json!({"jsonrpc": "2.0", "result": 5, "id": 1}));
//! # }
//! ```

pub mod batch;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod notification;
pub mod peer;
pub mod prelude;
pub mod registry;
pub mod request;
pub mod response;
pub mod service;
pub mod transport;
pub mod types;

// Re-export main types
pub use codec::{Codec, JsonCodec};
pub use config::DispatchConfig;
pub use dispatcher::JsonRpcDispatcher;
pub use envelope::{Call, Envelope, Incoming, classify};
pub use error::{
    CallError, CodecError, HandlerError, HandlerResult, JsonRpcError, JsonRpcErrorCode,
    JsonRpcErrorObject, RegistryError, TransportError,
};
pub use handler::{CallContext, FunctionHandler, JsonRpcHandler, handler_fn};
pub use notification::JsonRpcNotification;
pub use peer::{DuplexPeer, PeerConfig, PeerHandle};
pub use registry::{MethodRegistry, ParamShapes, RegisteredMethod};
pub use request::{JsonRpcRequest, RequestParams};
pub use response::{JsonRpcMessage, JsonRpcResponse};
pub use service::{JsonRpcService, Reply};
pub use transport::{ChannelSink, FrameSink, TransportKind};
pub use types::{JsonRpcVersion, ParamsShape, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    // Reserved block: -32768 to -32000
    pub const RESERVED_START: i64 = -32768;

    // Server error range: -32099 to -32000
    pub const SERVER_ERROR_START: i64 = -32099;
    pub const SERVER_ERROR_END: i64 = -32000;
}

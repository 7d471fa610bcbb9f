//! # JSON-RPC Dispatch Prelude
//!
//! Re-exports of the types most embedders need.
//!
//! ```rust
//! use jsonrpc_dispatch::prelude::*;
//! ```

// Core JSON-RPC types
pub use crate::error::{HandlerError, HandlerResult, JsonRpcError, JsonRpcErrorCode};
pub use crate::notification::JsonRpcNotification;
pub use crate::request::{JsonRpcRequest, RequestParams};
pub use crate::response::{JsonRpcMessage, JsonRpcResponse};
pub use crate::types::{JsonRpcVersion, RequestId};

// Dispatch
pub use crate::config::DispatchConfig;
pub use crate::dispatcher::JsonRpcDispatcher;
pub use crate::handler::{CallContext, JsonRpcHandler, handler_fn};
pub use crate::registry::ParamShapes;
pub use crate::service::JsonRpcService;

// Duplex transports
pub use crate::peer::{DuplexPeer, PeerConfig, PeerHandle};
pub use crate::transport::{FrameSink, TransportKind};

// Standard error codes
pub use crate::error_codes::*;

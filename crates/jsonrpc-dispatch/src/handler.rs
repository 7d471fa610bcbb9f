use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::HandlerResult;
use crate::peer::PeerHandle;
use crate::request::RequestParams;
use crate::transport::TransportKind;
use crate::types::RequestId;

/// Per-call information handed to a handler
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Method name as it arrived on the wire
    pub method: String,
    /// Request id, `None` for notifications
    pub request_id: Option<RequestId>,
    /// Flavor of the transport the call arrived on
    pub transport: TransportKind,
    /// The connection the call arrived on, when it is a duplex transport
    pub peer: Option<PeerHandle>,
    /// Embedder-supplied metadata (remote address, auth claims, ...)
    pub metadata: HashMap<String, Value>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for calls arriving over a duplex connection
    pub fn with_peer(mut self, peer: PeerHandle) -> Self {
        self.transport = TransportKind::Duplex;
        self.peer = Some(peer);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_notification(&self) -> bool {
        self.request_id.is_none()
    }

    /// Copy of the connection-level context scoped to one call.
    pub(crate) fn for_call(&self, method: &str, request_id: Option<RequestId>) -> Self {
        Self {
            method: method.to_string(),
            request_id,
            transport: self.transport,
            peer: self.peer.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Trait for handling one JSON-RPC method
///
/// Declared failures are returned as `Err(HandlerError)`. A panic escaping
/// `handle` is caught by the dispatcher and reported as an internal error.
#[async_trait]
pub trait JsonRpcHandler: Send + Sync {
    async fn handle(&self, params: Option<RequestParams>, ctx: CallContext) -> HandlerResult;
}

type HandlerFn =
    dyn Fn(Option<RequestParams>, CallContext) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// A simple function-based handler
pub struct FunctionHandler {
    handler_fn: Box<HandlerFn>,
}

impl FunctionHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<RequestParams>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            handler_fn: Box::new(move |params, ctx| Box::pin(f(params, ctx))),
        }
    }
}

#[async_trait]
impl JsonRpcHandler for FunctionHandler {
    async fn handle(&self, params: Option<RequestParams>, ctx: CallContext) -> HandlerResult {
        (self.handler_fn)(params, ctx).await
    }
}

/// Wrap an async closure as a handler.
///
/// ```
/// use jsonrpc_dispatch::handler_fn;
/// use serde_json::json;
///
/// let ping = handler_fn(|_params, _ctx| async { Ok(json!("pong")) });
/// # let _ = ping;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FunctionHandler
where
    F: Fn(Option<RequestParams>, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FunctionHandler::new(f)
}

//! Single-call dispatch
//!
//! Routes a [`Call`] to its registered handler, enforces the params contract,
//! applies the embedder's timeout, and turns every outcome (including a
//! handler panic) into a response. Notifications never produce one.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::config::DispatchConfig;
use crate::envelope::Call;
use crate::error::{
    HandlerError, JsonRpcError, JsonRpcErrorObject, RegistryError, is_reserved_code,
};
use crate::error_codes;
use crate::handler::{CallContext, JsonRpcHandler};
use crate::notification::JsonRpcNotification;
use crate::registry::{MethodRegistry, ParamShapes, RegisteredMethod};
use crate::request::{RequestParams, params_shape};
use crate::response::JsonRpcMessage;
use crate::types::RequestId;

struct DispatcherInner {
    registry: MethodRegistry,
    config: DispatchConfig,
}

/// JSON-RPC method dispatcher
///
/// Cheap to clone; clones share one registry. Independent dispatchers never
/// share state.
#[derive(Clone)]
pub struct JsonRpcDispatcher {
    inner: Arc<DispatcherInner>,
}

impl JsonRpcDispatcher {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Self::with_registry(MethodRegistry::new(), config)
    }

    pub fn with_registry(registry: MethodRegistry, config: DispatchConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner { registry, config }),
        }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Register a handler for a specific method
    pub fn register<H>(
        &self,
        method: impl Into<String>,
        handler: H,
        shapes: ParamShapes,
    ) -> Result<(), RegistryError>
    where
        H: JsonRpcHandler + 'static,
    {
        self.inner.registry.register(method, handler, shapes)
    }

    pub fn register_method(&self, method: RegisteredMethod) -> Result<(), RegistryError> {
        self.inner.registry.register_method(method)
    }

    /// Execute one call. Returns `None` for notifications.
    pub async fn invoke(&self, call: Call, ctx: &CallContext) -> Option<JsonRpcMessage> {
        let (method, params, id) = call.into_parts();
        let outcome = self.execute(&method, params, id.clone(), ctx).await;

        match id {
            None => {
                if let Err(err) = outcome {
                    debug!(method = %method, code = err.code, "Notification failed: {}", err.message);
                }
                None
            }
            Some(id) => Some(match outcome {
                Ok(result) => JsonRpcMessage::success(id, result),
                Err(err) => JsonRpcMessage::error(JsonRpcError::new(id, err)),
            }),
        }
    }

    /// Process a request and return its response
    pub async fn handle_request(
        &self,
        request: crate::request::JsonRpcRequest,
        ctx: &CallContext,
    ) -> JsonRpcMessage {
        let id = request.id.clone();
        self.invoke(Call::Request(request), ctx)
            .await
            .unwrap_or_else(|| JsonRpcMessage::error(JsonRpcError::internal_error(id, None)))
    }

    /// Process a notification; the outcome is discarded
    pub async fn handle_notification(&self, notification: JsonRpcNotification, ctx: &CallContext) {
        let _ = self.invoke(Call::Notification(notification), ctx).await;
    }

    async fn execute(
        &self,
        method: &str,
        params: Option<RequestParams>,
        id: Option<RequestId>,
        ctx: &CallContext,
    ) -> Result<Value, JsonRpcErrorObject> {
        let Some(entry) = self.inner.registry.lookup(method) else {
            debug!(method = %method, "Method not found");
            return Err(JsonRpcErrorObject::method_not_found(method));
        };

        let shape = params_shape(params.as_ref());
        if !entry.shapes.accepts(shape) {
            debug!(method = %method, shape = %shape, "Rejected params shape");
            return Err(JsonRpcErrorObject::invalid_params(&format!(
                "Method '{}' does not accept {} params",
                method, shape
            )));
        }

        let call_ctx = ctx.for_call(method, id);
        let running = AssertUnwindSafe(entry.handler.handle(params, call_ctx)).catch_unwind();

        let caught = match self.inner.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, running).await {
                Ok(caught) => caught,
                Err(_) => {
                    warn!(method = %method, timeout_ms = limit.as_millis() as u64, "Handler timed out");
                    return Err(JsonRpcErrorObject::internal_error(Some(json!({
                        "timeout_ms": limit.as_millis() as u64,
                    }))));
                }
            },
            None => running.await,
        };

        match caught {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(failure)) => Err(self.map_handler_error(method, failure)),
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(method = %method, "Handler panicked: {}", detail);
                Err(JsonRpcErrorObject::internal_error(self.diagnostics(json!({
                    "detail": detail,
                }))))
            }
        }
    }

    /// Pass declared failures through; reserved codes are not the handler's to use.
    fn map_handler_error(&self, method: &str, failure: HandlerError) -> JsonRpcErrorObject {
        if is_reserved_code(failure.code) && failure.code != error_codes::INVALID_PARAMS {
            warn!(method = %method, code = failure.code, "Handler returned a reserved error code");
            return JsonRpcErrorObject::internal_error(self.diagnostics(json!({
                "detail": failure.message,
                "code": failure.code,
            })));
        }
        failure.into_error_object()
    }

    fn diagnostics(&self, detail: Value) -> Option<Value> {
        self.inner.config.verbose_errors.then_some(detail)
    }
}

impl Default for JsonRpcDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JsonRpcDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcDispatcher")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in handler".to_string()
    }
}

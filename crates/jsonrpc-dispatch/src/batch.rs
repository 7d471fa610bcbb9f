//! Batch coordination
//!
//! Every element runs on its own task; a failing element never disturbs its
//! siblings. Responses come back in input order, notifications contribute
//! nothing.

use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::{debug, error};

use crate::dispatcher::JsonRpcDispatcher;
use crate::envelope::Incoming;
use crate::error::{JsonRpcError, JsonRpcErrorObject};
use crate::handler::CallContext;
use crate::response::JsonRpcMessage;

impl JsonRpcDispatcher {
    /// Execute a batch concurrently.
    ///
    /// The result holds one response per element that needs one, in the same
    /// relative order as the input. It is empty for an all-notification batch.
    /// Size limits are enforced by the caller before fan-out (see
    /// [`JsonRpcDispatcher::check_batch_size`]).
    pub async fn invoke_batch(&self, items: Vec<Incoming>, ctx: &CallContext) -> Vec<JsonRpcMessage> {
        let limit = self
            .config()
            .max_batch_concurrency
            .unwrap_or(items.len())
            .max(1);
        debug!(size = items.len(), concurrency = limit, "Dispatching batch");

        let tasks = items.into_iter().map(|item| {
            let dispatcher = self.clone();
            let ctx = ctx.clone();
            async move { dispatcher.invoke_element(item, ctx).await }
        });

        stream::iter(tasks)
            .buffered(limit)
            .filter_map(|reply| async move { reply })
            .collect()
            .await
    }

    /// Reject a batch larger than the configured maximum.
    pub fn check_batch_size(&self, size: usize) -> Result<(), JsonRpcError> {
        match self.config().max_batch_size {
            Some(max) if size > max => {
                debug!(size, max, "Rejected oversized batch");
                let data = self
                    .config()
                    .verbose_errors
                    .then(|| json!({"batch_size": size, "max_batch_size": max}));
                Err(JsonRpcError::invalid_request(data))
            }
            _ => Ok(()),
        }
    }

    async fn invoke_element(&self, item: Incoming, ctx: CallContext) -> Option<JsonRpcMessage> {
        match item {
            Incoming::Call(call) => {
                let id = call.id().cloned();
                let dispatcher = self.clone();
                let task = tokio::spawn(async move { dispatcher.invoke(call, &ctx).await });
                match task.await {
                    Ok(reply) => reply,
                    Err(join_error) => {
                        error!("Batch element task failed: {}", join_error);
                        id.map(|id| JsonRpcMessage::error(JsonRpcError::internal_error(id, None)))
                    }
                }
            }
            Incoming::Malformed(reason) => {
                debug!("Malformed batch element: {}", reason);
                Some(self.invalid_element(json!({"reason": reason})))
            }
            Incoming::Response(_) => Some(self.invalid_element(json!({
                "reason": "response objects are not valid batch elements",
            }))),
        }
    }

    fn invalid_element(&self, detail: serde_json::Value) -> JsonRpcMessage {
        let data = self.config().verbose_errors.then_some(detail);
        JsonRpcMessage::error(JsonRpcError::new(
            crate::types::RequestId::Null,
            JsonRpcErrorObject::invalid_request(data),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::envelope::{Envelope, classify};
    use crate::error::HandlerError;
    use crate::error_codes;
    use crate::handler::handler_fn;
    use crate::registry::ParamShapes;
    use crate::types::RequestId;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn batch(value: Value) -> Vec<Incoming> {
        match classify(value) {
            Envelope::Batch(items) => items,
            other => panic!("expected batch, got {:?}", other),
        }
    }

    fn dispatcher(config: DispatchConfig) -> JsonRpcDispatcher {
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
                "delay",
                handler_fn(|params, _ctx| async move {
                    let (ms,): (u64,) = params
                        .ok_or_else(|| HandlerError::invalid_params("expected [ms]"))?
                        .parse()?;
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(json!(ms))
                }),
                ParamShapes::positional(),
            )
            .unwrap();
        dispatcher
            .register(
                "explode",
                handler_fn(|_params, _ctx| async move {
                    if true {
                        panic!("boom");
                    }
                    Ok(Value::Null)
                }),
                ParamShapes::any(),
            )
            .unwrap();
        dispatcher
    }

    #[tokio::test]
    async fn test_mixed_batch_correlates_by_id() {
        let dispatcher = dispatcher(DispatchConfig::default());
        let items = batch(json!([
            {"jsonrpc": "2.0", "method": "add", "params": [1, 2], "id": "a"},
            {"jsonrpc": "2.0", "method": "missing", "id": "b"},
        ]));

        let replies = dispatcher.invoke_batch(items, &CallContext::new()).await;
        assert_eq!(replies.len(), 2);

        let a = replies.iter().find(|r| r.id() == &RequestId::from("a")).unwrap();
        let b = replies.iter().find(|r| r.id() == &RequestId::from("b")).unwrap();
        assert_eq!(a.result(), Some(&json!(3)));
        assert_eq!(b.error_code(), Some(error_codes::METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_notifications_are_dropped_and_order_kept() {
        let dispatcher = dispatcher(DispatchConfig::default());
        let items = batch(json!([
            {"jsonrpc": "2.0", "method": "delay", "params": [30], "id": 1},
            {"jsonrpc": "2.0", "method": "add", "params": [1, 1]},
            {"jsonrpc": "2.0", "method": "delay", "params": [1], "id": 2},
            {"jsonrpc": "2.0", "method": "explode"},
            {"jsonrpc": "2.0", "method": "add", "params": [2, 2], "id": 3},
        ]));

        let replies = dispatcher.invoke_batch(items, &CallContext::new()).await;
        let ids: Vec<_> = replies.iter().map(|r| r.id().clone()).collect();
        assert_eq!(
            ids,
            vec![RequestId::from(1i64), RequestId::from(2i64), RequestId::from(3i64)]
        );
    }

    #[tokio::test]
    async fn test_all_notification_batch_yields_nothing() {
        let dispatcher = dispatcher(DispatchConfig::default());
        let items = batch(json!([
            {"jsonrpc": "2.0", "method": "add", "params": [1, 2]},
            {"jsonrpc": "2.0", "method": "explode"},
            {"jsonrpc": "2.0", "method": "missing"},
        ]));

        assert!(dispatcher.invoke_batch(items, &CallContext::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_failing_element_does_not_disturb_siblings() {
        let dispatcher = dispatcher(DispatchConfig::default());
        let items = batch(json!([
            {"jsonrpc": "2.0", "method": "explode", "id": 1},
            {"jsonrpc": "2.0", "method": "add", "params": [20, 22], "id": 2},
            {"foo": "boo"},
            {"jsonrpc": "2.0", "method": "add", "params": {"a": 1}, "id": 3},
        ]));

        let replies = dispatcher.invoke_batch(items, &CallContext::new()).await;
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0].error_code(), Some(error_codes::INTERNAL_ERROR));
        assert_eq!(replies[1].result(), Some(&json!(42)));
        assert_eq!(replies[2].error_code(), Some(error_codes::INVALID_REQUEST));
        assert!(replies[2].id().is_null());
        assert_eq!(replies[3].error_code(), Some(error_codes::INVALID_PARAMS));
    }

    #[tokio::test]
    async fn test_distinct_ids_each_answered_once() {
        let dispatcher = dispatcher(DispatchConfig::default());
        let elements: Vec<Value> = (0..50)
            .map(|i| json!({"jsonrpc": "2.0", "method": "add", "params": [i, 1], "id": i}))
            .collect();

        let replies = dispatcher
            .invoke_batch(batch(Value::Array(elements)), &CallContext::new())
            .await;
        assert_eq!(replies.len(), 50);
        for i in 0..50i64 {
            let matching: Vec<_> = replies
                .iter()
                .filter(|r| r.id() == &RequestId::from(i))
                .collect();
            assert_eq!(matching.len(), 1);
            assert_eq!(matching[0].result(), Some(&json!(i + 1)));
        }
    }

    #[tokio::test]
    async fn test_elements_run_concurrently() {
        let dispatcher = dispatcher(DispatchConfig::default());
        let elements: Vec<Value> = (0..10)
            .map(|i| json!({"jsonrpc": "2.0", "method": "delay", "params": [200], "id": i}))
            .collect();

        let started = tokio::time::Instant::now();
        let replies = dispatcher
            .invoke_batch(batch(Value::Array(elements)), &CallContext::new())
            .await;
        assert_eq!(replies.len(), 10);
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let dispatcher = JsonRpcDispatcher::with_config(DispatchConfig::new().max_batch_concurrency(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (running_ref, peak_ref) = (Arc::clone(&running), Arc::clone(&peak));
        dispatcher
            .register(
                "work",
                handler_fn(move |_params, _ctx| {
                    let running = Arc::clone(&running_ref);
                    let peak = Arc::clone(&peak_ref);
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(Value::Null)
                    }
                }),
                ParamShapes::any(),
            )
            .unwrap();

        let elements: Vec<Value> = (0..8)
            .map(|i| json!({"jsonrpc": "2.0", "method": "work", "id": i}))
            .collect();
        let replies = dispatcher
            .invoke_batch(batch(Value::Array(elements)), &CallContext::new())
            .await;

        assert_eq!(replies.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_batch_size_limit() {
        let dispatcher = JsonRpcDispatcher::with_config(DispatchConfig::new().max_batch_size(2));
        assert!(dispatcher.check_batch_size(2).is_ok());

        let err = dispatcher.check_batch_size(3).unwrap_err();
        assert_eq!(err.error.code, error_codes::INVALID_REQUEST);
        assert!(err.id.is_null());
        assert!(JsonRpcDispatcher::new().check_batch_size(10_000).is_ok());
    }
}

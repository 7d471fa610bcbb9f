//! Duplex connection peer
//!
//! One [`DuplexPeer`] per duplex connection. Inbound frames are queued and
//! processed on worker tasks; responses to calls this side issued are routed
//! straight to the waiting caller. Handlers reach the same connection through
//! the [`PeerHandle`] in their [`CallContext`] to call or notify the remote
//! side.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::config::option_duration_millis;
use crate::envelope::{Envelope, Incoming, classify};
use crate::error::{CallError, CodecError, TransportError};
use crate::handler::CallContext;
use crate::notification::JsonRpcNotification;
use crate::request::{JsonRpcRequest, RequestParams};
use crate::response::JsonRpcMessage;
use crate::service::JsonRpcService;
use crate::transport::FrameSink;
use crate::types::RequestId;

/// Per-connection limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Inbound frames buffered before `on_frame` applies backpressure
    pub queue_depth: usize,
    /// Inbound frames processed at once
    pub max_in_flight: usize,
    /// How long an outbound call waits for its response
    #[serde(with = "option_duration_millis")]
    pub call_timeout: Option<Duration>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            max_in_flight: 32,
            call_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl PeerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit.max(1);
        self
    }

    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }
}

struct PeerShared {
    sink: Arc<dyn FrameSink>,
    codec: Arc<dyn Codec>,
    pending: Mutex<HashMap<u64, oneshot::Sender<JsonRpcMessage>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    call_timeout: Option<Duration>,
}

/// Outbound side of a duplex connection, cheap to clone
#[derive(Clone)]
pub struct PeerHandle {
    shared: Arc<PeerShared>,
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerHandle")
            .field("pending_calls", &self.pending_calls())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PeerHandle {
    /// Call a method on the remote side and wait for its response.
    pub async fn call(
        &self,
        method: &str,
        params: Option<RequestParams>,
    ) -> Result<Value, CallError> {
        if self.is_closed() {
            return Err(CallError::Closed);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);
        if self.is_closed() {
            self.shared.pending.lock().remove(&id);
            return Err(CallError::Closed);
        }

        let request = JsonRpcRequest::new(RequestId::from(id), method, params);
        if let Err(err) = self.send_value(&request).await {
            self.shared.pending.lock().remove(&id);
            return Err(err.into());
        }
        debug!(id, method, "Outbound call sent");

        let reply = match self.shared.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.shared.pending.lock().remove(&id);
                    debug!(id, method, "Outbound call timed out");
                    return Err(CallError::Timeout);
                }
            },
            None => rx.await,
        };

        reply
            .map_err(|_| CallError::Closed)?
            .into_result()
            .map_err(CallError::Remote)
    }

    /// Send a notification to the remote side.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<RequestParams>,
    ) -> Result<(), CallError> {
        if self.is_closed() {
            return Err(CallError::Closed);
        }
        self.send_value(&JsonRpcNotification::new(method, params))
            .await?;
        Ok(())
    }

    /// Fail every pending call with [`CallError::Closed`] and refuse new ones.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let failed: Vec<_> = self.shared.pending.lock().drain().collect();
        debug!(failed = failed.len(), "Peer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Outbound calls still waiting for a response
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.lock().len()
    }

    async fn send_value<T: Serialize>(&self, message: &T) -> Result<(), TransportError> {
        let value =
            serde_json::to_value(message).map_err(|e| CodecError::Encode(e.to_string()))?;
        let frame = self.shared.codec.encode(&value)?;
        self.shared.sink.send(frame).await
    }

    async fn write(&self, frame: Bytes) {
        if let Err(err) = self.shared.sink.send(frame).await {
            warn!("Failed to write reply: {}", err);
        }
    }

    fn complete(&self, message: JsonRpcMessage) {
        let waiter = message
            .id()
            .as_u64()
            .and_then(|id| self.shared.pending.lock().remove(&id));
        match waiter {
            Some(tx) => {
                if tx.send(message).is_err() {
                    debug!("Caller gave up before its response arrived");
                }
            }
            None => warn!(id = %message.id(), "Dropping response with no pending call"),
        }
    }

    /// Hand responses to their callers; return whatever still needs dispatch.
    fn route(&self, envelope: Envelope) -> Option<Envelope> {
        match envelope {
            Envelope::Single(Incoming::Response(message)) => {
                self.complete(message);
                None
            }
            Envelope::Batch(items)
                if items.iter().any(|item| matches!(item, Incoming::Response(_))) =>
            {
                let mut calls = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Incoming::Response(message) => self.complete(message),
                        other => calls.push(other),
                    }
                }
                (!calls.is_empty()).then_some(Envelope::Batch(calls))
            }
            other => Some(other),
        }
    }
}

/// Inbound side of a duplex connection, owned by the adapter's reader
#[derive(Debug)]
pub struct DuplexPeer {
    inbound: mpsc::Sender<Bytes>,
    handle: PeerHandle,
}

impl DuplexPeer {
    /// Start the processing task for one connection.
    pub fn spawn<C: Codec + Clone>(
        service: JsonRpcService<C>,
        sink: Arc<dyn FrameSink>,
        config: PeerConfig,
    ) -> Self {
        Self::spawn_with_context(service, sink, config, CallContext::new())
    }

    /// Like [`DuplexPeer::spawn`], with connection-level metadata every
    /// handler on this connection will see.
    pub fn spawn_with_context<C: Codec + Clone>(
        service: JsonRpcService<C>,
        sink: Arc<dyn FrameSink>,
        config: PeerConfig,
        ctx: CallContext,
    ) -> Self {
        let handle = PeerHandle {
            shared: Arc::new(PeerShared {
                sink,
                codec: Arc::new(service.codec().clone()),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                call_timeout: config.call_timeout,
            }),
        };

        let (inbound, rx) = mpsc::channel(config.queue_depth.max(1));
        let workers = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        let ctx = ctx.with_peer(handle.clone());
        tokio::spawn(pump(Arc::new(service), handle.clone(), ctx, rx, workers));

        Self { inbound, handle }
    }

    /// Queue an inbound frame, waiting while the queue is full.
    pub async fn on_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        self.inbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub fn handle(&self) -> PeerHandle {
        self.handle.clone()
    }

    /// Stop accepting frames and fail pending outbound calls.
    ///
    /// Frames already queued are still processed.
    pub fn close(self) {
        self.handle.close();
    }
}

async fn pump<C: Codec>(
    service: Arc<JsonRpcService<C>>,
    handle: PeerHandle,
    ctx: CallContext,
    mut inbound: mpsc::Receiver<Bytes>,
    workers: Arc<Semaphore>,
) {
    while let Some(frame) = inbound.recv().await {
        // Responses are routed here, never behind the worker limit.
        let job = match service.codec().decode(&frame) {
            Ok(value) => match handle.route(classify(value)) {
                Some(envelope) => Ok(envelope),
                None => continue,
            },
            Err(err) => Err(err),
        };

        // The worker waits for its slot, not the pump: the pump must keep
        // draining `inbound` to route responses while every slot is busy.
        let workers = Arc::clone(&workers);
        let service = Arc::clone(&service);
        let handle = handle.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            let reply = match job {
                Ok(envelope) => service.handle_envelope(envelope, &ctx).await,
                Err(err) => Some(service.decode_error_reply(&err)),
            };
            if let Some(reply) = reply {
                handle.write(service.encode_reply(&reply)).await;
            }
        });
    }

    debug!("Inbound queue closed");
    handle.close();
}

//! Transport adapter contract
//!
//! Adapters move raw frames between the network and the core. A unary
//! adapter hands each inbound frame to [`JsonRpcService::handle_frame`] and
//! writes back at most one frame. A duplex adapter feeds frames to a
//! [`DuplexPeer`] and gives the core a [`FrameSink`] to write through at any
//! time.
//!
//! [`JsonRpcService::handle_frame`]: crate::service::JsonRpcService::handle_frame
//! [`DuplexPeer`]: crate::peer::DuplexPeer

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// The two adapter flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// One frame in, at most one frame out (HTTP request/response)
    #[default]
    Unary,
    /// Either side may send at any time (WebSocket)
    Duplex,
}

/// Outbound half of a transport
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&self, frame: Bytes) -> Result<(), TransportError>;
}

/// Sink feeding a bounded channel drained by the adapter's writer task
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiver the writer task drains
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

//! WebSocket transport
//!
//! Duplex adapter: every connection gets its own [`DuplexPeer`], so handlers
//! can call back into the client over the same socket.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{WebSocketStream, accept_async_with_config};
use tracing::{debug, error, info, warn};

use jsonrpc_dispatch::{
    CallContext, ChannelSink, DuplexPeer, JsonRpcDispatcher, JsonRpcHandler, JsonRpcService,
    ParamShapes, PeerConfig, PeerHandle,
};

use crate::Result;

/// Called once per accepted connection with that connection's peer
pub type ConnectHook = Arc<dyn Fn(PeerHandle) + Send + Sync>;

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Largest message accepted from a client
    pub max_message_size: usize,
    /// Outbound frames buffered per connection
    pub outbound_queue: usize,
    /// Per-connection peer limits
    pub peer: PeerConfig,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8001)),
            max_message_size: 16 * 1024 * 1024, // 16MB
            outbound_queue: 64,
            peer: PeerConfig::default(),
        }
    }
}

/// Builder for the WebSocket server
pub struct WebSocketServerBuilder {
    config: WsConfig,
    dispatcher: JsonRpcDispatcher,
    on_connect: Option<ConnectHook>,
}

impl WebSocketServerBuilder {
    pub fn new() -> Self {
        Self {
            config: WsConfig::default(),
            dispatcher: JsonRpcDispatcher::new(),
            on_connect: None,
        }
    }

    pub fn dispatcher(mut self, dispatcher: JsonRpcDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn peer_config(mut self, config: PeerConfig) -> Self {
        self.config.peer = config;
        self
    }

    /// Run `hook` for every new connection
    pub fn on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn(PeerHandle) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Register a handler for one method
    pub fn register<H>(self, name: &str, handler: H, shapes: ParamShapes) -> Result<Self>
    where
        H: JsonRpcHandler + 'static,
    {
        self.dispatcher.register(name, handler, shapes)?;
        Ok(self)
    }

    pub fn build(self) -> WebSocketServer {
        WebSocketServer {
            config: Arc::new(self.config),
            service: JsonRpcService::new(self.dispatcher),
            on_connect: self.on_connect,
        }
    }
}

impl Default for WebSocketServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket JSON-RPC server
#[derive(Clone)]
pub struct WebSocketServer {
    config: Arc<WsConfig>,
    service: JsonRpcService,
    on_connect: Option<ConnectHook>,
}

impl WebSocketServer {
    pub fn builder() -> WebSocketServerBuilder {
        WebSocketServerBuilder::new()
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!("WebSocket JSON-RPC server listening on {}", self.config.bind_address);
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("WebSocket server shutting down");
                    return Ok(());
                }
            };
            debug!("New connection from {}", peer_addr);

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream, peer_addr).await {
                    error!("Error serving WebSocket connection {}: {}", peer_addr, err);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        let ws_config =
            WebSocketConfig::default().max_message_size(Some(self.config.max_message_size));
        let ws = accept_async_with_config(stream, Some(ws_config)).await?;
        let (ws_tx, mut ws_rx) = ws.split();

        let (sink, frames) = ChannelSink::channel(self.config.outbound_queue);
        let (control_tx, control_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();
        let writer = tokio::spawn(write_loop(ws_tx, frames, control_rx, stop_rx));

        let ctx = CallContext::new().with_metadata("remote_addr", json!(peer_addr.to_string()));
        let peer = DuplexPeer::spawn_with_context(
            self.service.clone(),
            Arc::new(sink),
            self.config.peer.clone(),
            ctx,
        );
        if let Some(hook) = &self.on_connect {
            hook(peer.handle());
        }

        while let Some(message) = ws_rx.next().await {
            let frame = match message {
                Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_bytes()),
                Ok(Message::Binary(data)) => data,
                Ok(Message::Ping(data)) => {
                    if control_tx.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                    continue;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    warn!("WebSocket read error from {}: {}", peer_addr, err);
                    break;
                }
            };
            if peer.on_frame(frame).await.is_err() {
                break;
            }
        }

        debug!("Connection from {} closed", peer_addr);
        peer.close();
        let _ = stop_tx.send(());
        if let Err(err) = writer.await {
            error!("WebSocket writer task failed: {}", err);
        }
        Ok(())
    }
}

async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocketStream<TcpStream>, Message>,
    mut frames: mpsc::Receiver<Bytes>,
    mut control: mpsc::Receiver<Message>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let message = tokio::select! {
            Some(frame) = frames.recv() => frame_message(frame),
            Some(message) = control.recv() => message,
            _ = &mut stop => break,
            else => break,
        };
        if let Err(err) = ws_tx.send(message).await {
            debug!("WebSocket write failed: {}", err);
            break;
        }
    }
    let _ = ws_tx.close().await;
}

/// JSON frames travel as text; anything else as binary.
fn frame_message(frame: Bytes) -> Message {
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(frame),
    }
}

//! # JSON-RPC Dispatch Server
//!
//! Network adapters for the `jsonrpc-dispatch` core. They move frames and
//! nothing else: every protocol decision is made by the core.
//!
//! ## Supported Transports
//! - **HTTP**: unary, one JSON-RPC frame per POST
//! - **WebSocket**: duplex, either side may call the other
//!
//! ## Features
//! - Body size limits and content-type enforcement
//! - CORS support for browser-based clients
//! - Per-connection peers with bounded in-flight work

pub mod cors;
pub mod http;
pub mod prelude;
pub mod websocket;

#[cfg(test)]
mod tests;

// Re-export main types
pub use cors::CorsLayer;
pub use http::{HttpServer, HttpServerBuilder, ServerConfig};
pub use websocket::{ConnectHook, WebSocketServer, WebSocketServerBuilder, WsConfig};

// Re-export foundational types
pub use jsonrpc_dispatch::{JsonRpcDispatcher, JsonRpcHandler, JsonRpcService};

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] jsonrpc_dispatch::RegistryError),

    #[error("Transport error: {0}")]
    Transport(#[from] jsonrpc_dispatch::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

//! # JSON-RPC Dispatch Server Prelude
//!
//! ```rust
//! use jsonrpc_dispatch_server::prelude::*;
//! ```

pub use crate::{
    CorsLayer, HttpServer, HttpServerBuilder, Result, ServerConfig, ServerError, WebSocketServer,
    WebSocketServerBuilder, WsConfig,
};

pub use jsonrpc_dispatch::prelude::*;

//! HTTP transport
//!
//! Unary adapter: each POST body is one frame, the response body is the
//! reply frame (if any).

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use jsonrpc_dispatch::{
    CallContext, Codec, JsonRpcDispatcher, JsonRpcHandler, JsonRpcService, ParamShapes,
};

use crate::{CorsLayer, Result, ServerError};

/// Configuration for the HTTP server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Path for the JSON-RPC endpoint
    pub rpc_path: String,
    /// Enable CORS
    pub enable_cors: bool,
    /// Single allowed origin; `None` allows any
    pub cors_origin: Option<String>,
    /// Maximum request body size
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8000)),
            rpc_path: "/rpc".to_string(),
            enable_cors: true,
            cors_origin: None,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Builder for the HTTP server
pub struct HttpServerBuilder {
    config: ServerConfig,
    dispatcher: JsonRpcDispatcher,
}

impl HttpServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher: JsonRpcDispatcher::new(),
        }
    }

    /// Serve an existing dispatcher, e.g. one shared with a WebSocket server
    pub fn dispatcher(mut self, dispatcher: JsonRpcDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Set the JSON-RPC endpoint path
    pub fn rpc_path(mut self, path: impl Into<String>) -> Self {
        self.config.rpc_path = path.into();
        self
    }

    /// Enable or disable CORS
    pub fn cors(mut self, enable: bool) -> Self {
        self.config.enable_cors = enable;
        self
    }

    /// Restrict CORS to one origin
    pub fn cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.cors_origin = Some(origin.into());
        self
    }

    /// Set maximum request body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
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

    /// Build the server. Fails when `cors_origin` is not a valid header value.
    pub fn build(self) -> Result<HttpServer> {
        let cors_origin = match &self.config.cors_origin {
            Some(origin) => Some(HeaderValue::from_str(origin).map_err(|_| {
                ServerError::Config(format!("invalid CORS origin: {:?}", origin))
            })?),
            None => None,
        };
        Ok(HttpServer {
            config: Arc::new(self.config),
            service: JsonRpcService::new(self.dispatcher),
            cors_origin,
        })
    }
}

impl Default for HttpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP JSON-RPC server
#[derive(Clone)]
pub struct HttpServer {
    config: Arc<ServerConfig>,
    service: JsonRpcService,
    cors_origin: Option<HeaderValue>,
}

impl HttpServer {
    pub fn builder() -> HttpServerBuilder {
        HttpServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn service(&self) -> &JsonRpcService {
        &self.service
    }

    /// Bind the configured address and serve until the process exits
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!("HTTP JSON-RPC server listening on {}", self.config.bind_address);
        info!("JSON-RPC endpoint available at: {}", self.config.rpc_path);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Serve until `shutdown` resolves. Connections already accepted finish
    /// on their own tasks.
    pub async fn serve_with_shutdown<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => accepted?,
                _ = &mut shutdown => {
                    info!("HTTP server shutting down");
                    return Ok(());
                }
            };
            debug!("New connection from {}", peer_addr);

            let server = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle(req, Some(peer_addr)).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    if err.is_incomplete_message() {
                        debug!("Client disconnected (normal): {}", err);
                    } else {
                        error!("Error serving connection: {}", err);
                    }
                }
            });
        }
    }

    /// Turn one HTTP request into one HTTP response.
    pub async fn handle<B>(&self, req: Request<B>, remote: Option<SocketAddr>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        debug!("Handling {} {}", req.method(), req.uri().path());

        let mut response = if req.uri().path() != self.config.rpc_path {
            plain(StatusCode::NOT_FOUND, "Not Found")
        } else if req.method() == Method::OPTIONS && self.config.enable_cors {
            empty(StatusCode::NO_CONTENT)
        } else if req.method() != Method::POST {
            let mut response = plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("POST, OPTIONS"));
            response
        } else {
            self.handle_post(req, remote).await
        };

        if self.config.enable_cors {
            match &self.cors_origin {
                Some(origin) => {
                    CorsLayer::apply_cors_headers_for_origin(response.headers_mut(), origin.clone())
                }
                None => CorsLayer::apply_cors_headers(response.headers_mut()),
            }
        }
        response
    }

    async fn handle_post<B>(&self, req: Request<B>, remote: Option<SocketAddr>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let expected = self.service.codec().content_type();
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("");
        if !content_type.starts_with(expected) {
            warn!("Invalid content type: {}", content_type);
            return plain(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Content-Type must be application/json",
            );
        }

        let max = self.config.max_body_size;
        let declared = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse::<usize>().ok());
        if declared.is_some_and(|len| len > max) {
            warn!("Request body too large: {:?} bytes", declared);
            return plain(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }

        let body = match Limited::new(req.into_body(), max).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                warn!("Request body exceeded {} bytes", max);
                return plain(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
            }
            Err(err) => {
                error!("Failed to read request body: {}", err);
                return plain(StatusCode::BAD_REQUEST, "Failed to read request body");
            }
        };

        let mut ctx = CallContext::new();
        if let Some(addr) = remote {
            ctx = ctx.with_metadata("remote_addr", json!(addr.to_string()));
        }

        match self.service.handle_frame(&body, &ctx).await {
            Some(frame) => {
                let mut response = Response::new(Full::new(frame));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(expected));
                response
            }
            None => empty(StatusCode::NO_CONTENT),
        }
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.rpc_path, "/rpc");
        assert!(config.enable_cors);
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[test]
    fn test_builder() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 3000);
        let server = HttpServer::builder()
            .bind_address(addr)
            .rpc_path("/api/rpc")
            .cors(false)
            .max_body_size(2048)
            .build()
            .unwrap();

        assert_eq!(server.config().bind_address, addr);
        assert_eq!(server.config().rpc_path, "/api/rpc");
        assert!(!server.config().enable_cors);
        assert_eq!(server.config().max_body_size, 2048);
    }

    #[test]
    fn test_builder_rejects_duplicate_method() {
        let handler = || jsonrpc_dispatch::handler_fn(|_params, _ctx| async { Ok(json!(null)) });
        let result = HttpServer::builder()
            .register("ping", handler(), ParamShapes::any())
            .and_then(|b| b.register("ping", handler(), ParamShapes::any()));
        assert!(matches!(result, Err(crate::ServerError::Registry(_))));
    }

    #[test]
    fn test_build_rejects_invalid_cors_origin() {
        let result = HttpServer::builder().cors_origin("bad\norigin").build();
        assert!(matches!(result, Err(ServerError::Config(_))));

        let server = HttpServer::builder()
            .cors_origin("https://app.example")
            .build()
            .unwrap();
        assert_eq!(
            server.cors_origin.as_ref().unwrap(),
            "https://app.example"
        );
    }
}

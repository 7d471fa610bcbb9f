//! # Calculator JSON-RPC Server
//!
//! Serves the same calculator methods over HTTP and WebSocket from one
//! shared dispatcher.
//!
//! ## Usage
//! ```bash
//! cargo run --bin calculator-server -- --http 127.0.0.1:8000 --ws 127.0.0.1:8001
//! ```
//!
//! ```bash
//! curl -X POST http://127.0.0.1:8000/rpc \
//!   -H "Content-Type: application/json" \
//!   -d '[{"jsonrpc":"2.0","method":"add","params":[1,2],"id":1},{"jsonrpc":"2.0","method":"divide","params":{"dividend":1,"divisor":0},"id":2}]'
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use jsonrpc_dispatch::prelude::*;
use jsonrpc_dispatch::RegisteredMethod;
use jsonrpc_dispatch_server::{HttpServer, WebSocketServer};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DIVISION_BY_ZERO: i64 = -32000;

#[derive(Parser)]
#[command(name = "calculator-server")]
#[command(about = "Calculator served over JSON-RPC 2.0 (HTTP and WebSocket)")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:8000")]
    http: SocketAddr,

    #[arg(long, default_value = "127.0.0.1:8001")]
    ws: SocketAddr,

    /// Per-call handler timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Largest batch accepted
    #[arg(long, default_value = "100")]
    max_batch: usize,

    /// Include internal failure detail in error responses
    #[arg(long)]
    verbose_errors: bool,
}

#[derive(Deserialize)]
struct Division {
    dividend: f64,
    divisor: f64,
}

fn calculator(config: DispatchConfig) -> Result<JsonRpcDispatcher> {
    let dispatcher = JsonRpcDispatcher::with_config(config);

    dispatcher.register(
        "add",
        handler_fn(|params, _ctx| async move {
            let numbers: Vec<f64> = params
                .ok_or_else(|| HandlerError::invalid_params("expected an array of numbers"))?
                .parse()?;
            Ok(json!(numbers.iter().sum::<f64>()))
        }),
        ParamShapes::positional(),
    )?;

    dispatcher.register_method(
        RegisteredMethod::new(
            "divide",
            handler_fn(|params, _ctx| async move {
                let division: Division = params
                    .ok_or_else(|| HandlerError::invalid_params("expected {dividend, divisor}"))?
                    .parse()?;
                if division.divisor == 0.0 {
                    return Err(HandlerError::server_error(DIVISION_BY_ZERO, "Division by zero")
                        .with_data(json!({"dividend": division.dividend})));
                }
                Ok(json!(division.dividend / division.divisor))
            }),
        )
        .accepts(ParamShapes::named())
        .declares_errors([DIVISION_BY_ZERO]),
    )?;

    dispatcher.register(
        "sleep",
        handler_fn(|params, _ctx| async move {
            let (ms,): (u64,) = params
                .ok_or_else(|| HandlerError::invalid_params("expected [milliseconds]"))?
                .parse()?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!(ms))
        }),
        ParamShapes::positional(),
    )?;

    // Over WebSocket, asks the caller who it is before answering.
    dispatcher.register(
        "greet",
        handler_fn(|_params, ctx| async move {
            let name = match &ctx.peer {
                Some(peer) => peer
                    .call("client.name", None)
                    .await
                    .unwrap_or_else(|_| Value::from("stranger")),
                None => Value::from("stranger"),
            };
            Ok(json!(format!("hello, {}", name.as_str().unwrap_or("stranger"))))
        }),
        ParamShapes::none(),
    )?;

    Ok(dispatcher)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = DispatchConfig::new()
        .call_timeout(Duration::from_millis(args.timeout_ms))
        .max_batch_size(args.max_batch)
        .verbose_errors(args.verbose_errors);
    let dispatcher = calculator(config)?;
    info!(methods = ?dispatcher.registry().method_names(), "Calculator ready");

    let http = HttpServer::builder()
        .dispatcher(dispatcher.clone())
        .bind_address(args.http)
        .build()?;
    let ws = WebSocketServer::builder()
        .dispatcher(dispatcher)
        .bind_address(args.ws)
        .on_connect(|peer| {
            tokio::spawn(async move {
                let params = RequestParams::from_value(json!({"version": env!("CARGO_PKG_VERSION")}));
                if let Err(err) = peer.notify("server.welcome", params).await {
                    tracing::debug!("Welcome notification not delivered: {}", err);
                }
            });
        })
        .build();

    println!("HTTP endpoint:      http://{}/rpc", args.http);
    println!("WebSocket endpoint: ws://{}", args.ws);

    tokio::select! {
        result = http.run() => result?,
        result = ws.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}

//! Transport tests for the HTTP and WebSocket adapters

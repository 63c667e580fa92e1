//! # duplexmcp-transport
//!
//! Transport bindings for the MCP runtime. All transports satisfy the same
//! contract - frames up, frames down, connect/disconnect surfaced - and are
//! never aware of message semantics beyond framing.
//!
//! Four bindings are provided:
//!
//! - [`stdio`] - newline-delimited JSON over stdin/stdout of the current
//!   process or a spawned child (sanitized environment)
//! - [`streamable_http`] / [`streamable_http_client`] - the forward-path
//!   HTTP transport: one endpoint, session header, optional SSE upgrade
//! - [`http_sse`] / [`http_sse_client`] - the legacy two-endpoint SSE
//!   transport kept for `2024-11-05` clients; parallel to streamable HTTP,
//!   no shared state
//! - [`websocket`] - text-frame duplex

pub mod core;
pub mod http_sse;
pub mod http_sse_client;
pub mod sse;
pub mod stdio;
pub mod streamable_http;
pub mod streamable_http_client;
pub mod websocket;

pub use crate::core::{
    SESSION_HEADER, Transport, TransportError, TransportEvent, TransportKind, TransportResult,
};
pub use http_sse::{HttpSseServer, HttpSseServerConfig};
pub use http_sse_client::HttpSseTransport;
pub use stdio::{StdioServer, StdioTransport};
pub use streamable_http::{StreamableHttpConfig, StreamableHttpServer};
pub use streamable_http_client::StreamableHttpTransport;
pub use websocket::{WebSocketServer, WebSocketServerConfig, WebSocketTransport};

//! # duplexmcp-client
//!
//! The MCP client protocol engine. A [`Client`] runs the initialization
//! handshake, exposes the MCP operations (tools, prompts, resources,
//! logging, completion) gated on the server's declared capabilities, and
//! routes server-initiated traffic - `roots/list`, `sampling/createMessage`,
//! progress and log notifications - to registered callbacks.
//!
//! Requests are correlated over a single connection, so any number may be in
//! flight concurrently; each carries a deadline and can be cancelled.

mod client;
pub mod error;
pub mod handlers;

pub use client::{Client, ClientConfig};
pub use error::{ClientError, ClientResult};
pub use handlers::{LogCallback, ProgressCallback, SamplingHandler};

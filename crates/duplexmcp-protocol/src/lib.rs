//! # duplexmcp-protocol
//!
//! Protocol engine for the Model Context Protocol (MCP): a bidirectional
//! JSON-RPC 2.0 runtime shared by the server and client crates.
//!
//! This crate provides:
//!
//! - [`jsonrpc`] - JSON-RPC 2.0 message structures and classification
//! - [`codec`] - Frame encoding/decoding (single objects, batches,
//!   newline-delimited streams)
//! - [`error`] - The protocol error taxonomy with JSON-RPC numeric codes
//! - [`ids`] - Request-id and progress-token generation
//! - [`version`] - Protocol version negotiation
//! - [`schema`] - Declarative parameter schemas, JSON Schema emission, and a
//!   coercing validator with path-qualified errors
//! - [`correlator`] - The pending-request table matching responses to the
//!   requests that produced them, with timeouts and cancellation
//! - [`uri_template`] - `{var}` URI template matching for resource routing
//! - [`types`] - MCP wire types (initialization, capabilities, tools,
//!   prompts, resources, logging, sampling, roots, completion)

pub mod codec;
pub mod correlator;
pub mod error;
pub mod ids;
pub mod jsonrpc;
pub mod methods;
pub mod schema;
pub mod service;
pub mod types;
pub mod uri_template;
pub mod version;

pub use codec::{decode, encode, encode_batch};
pub use correlator::{RequestCorrelator, RequestOutcome, ResponseWaiter};
pub use error::{Error, Result, error_codes};
pub use ids::{ProgressTokenGenerator, RequestIdGenerator};
pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use service::{McpService, SessionRejection};
pub use version::{LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS, negotiate_version};

/// Maximum accepted frame size in bytes.
///
/// Frames larger than this are rejected at the codec boundary before any
/// parsing work happens.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

//! # duplexmcp-server
//!
//! The MCP server protocol engine: a component registry for tools, prompts,
//! and resources; per-session state with pluggable persistence; and the
//! method dispatcher enforcing the initialization and capability gates.
//!
//! A server is assembled through [`McpServerBuilder`], then bound to one or
//! more transports as an `Arc<dyn McpService>`:
//!
//! ```
//! use std::sync::Arc;
//! use duplexmcp_protocol::schema::{FieldSpec, Schema};
//! use duplexmcp_protocol::types::{CallToolResult, Tool};
//! use duplexmcp_server::{McpServer, handlers::tool_fn};
//!
//! # fn main() -> duplexmcp_server::ServerResult<()> {
//! let server = McpServer::builder("weather", "1.0.0")
//!     .tool(
//!         Tool {
//!             name: "get_weather".into(),
//!             title: None,
//!             description: Some("Current conditions for a city".into()),
//!             input_schema: serde_json::json!({}),
//!             output_schema: None,
//!             annotations: None,
//!         },
//!         Schema::new().field("location", FieldSpec::string().required()),
//!         tool_fn(|args, _ctx| async move {
//!             Ok(CallToolResult::text(format!("sunny in {}", args["location"])))
//!         }),
//!     )
//!     .build()?;
//! assert!(server.capabilities().tools.is_some());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod handlers;
pub mod registry;
mod routing;
pub mod server;
pub mod session;
pub mod store;

pub use error::{ServerError, ServerResult};
pub use handlers::RequestContext;
pub use registry::ComponentRegistry;
pub use server::{McpServer, McpServerBuilder, ServerConfig};
pub use session::{Session, SessionManager};
pub use store::{InMemorySessionStore, SessionState, SessionStore, StoreError};

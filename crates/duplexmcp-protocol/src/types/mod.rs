//! MCP wire types.
//!
//! Field names follow the MCP specification for the negotiated protocol
//! versions; unknown fields are ignored on deserialization.

pub mod capabilities;
pub mod completion;
pub mod content;
pub mod core;
pub mod initialization;
pub mod logging;
pub mod notifications;
pub mod prompts;
pub mod resources;
pub mod roots;
pub mod sampling;
pub mod tools;

pub use self::capabilities::*;
pub use self::completion::*;
pub use self::content::*;
pub use self::core::*;
pub use self::initialization::*;
pub use self::logging::*;
pub use self::notifications::*;
pub use self::prompts::*;
pub use self::resources::*;
pub use self::roots::*;
pub use self::sampling::*;
pub use self::tools::*;

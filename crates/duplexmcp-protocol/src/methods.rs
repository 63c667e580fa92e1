//! MCP method name constants.

/// `initialize` request.
pub const INITIALIZE: &str = "initialize";
/// `ping` request, allowed at any time from either peer.
pub const PING: &str = "ping";
/// `tools/list` request.
pub const TOOLS_LIST: &str = "tools/list";
/// `tools/call` request.
pub const TOOLS_CALL: &str = "tools/call";
/// `prompts/list` request.
pub const PROMPTS_LIST: &str = "prompts/list";
/// `prompts/get` request.
pub const PROMPTS_GET: &str = "prompts/get";
/// `resources/list` request.
pub const RESOURCES_LIST: &str = "resources/list";
/// `resources/templates/list` request.
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
/// `resources/read` request.
pub const RESOURCES_READ: &str = "resources/read";
/// `logging/setLevel` request.
pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
/// `completion/complete` request.
pub const COMPLETION_COMPLETE: &str = "completion/complete";
/// `roots/list` request (server to client).
pub const ROOTS_LIST: &str = "roots/list";
/// `sampling/createMessage` request (server to client).
pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";

/// `notifications/initialized`, sent by the client after the initialize
/// response.
pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
/// `notifications/cancelled`, fire-and-forget cancellation.
pub const NOTIFICATION_CANCELLED: &str = "notifications/cancelled";
/// `notifications/progress`, keyed by progress token.
pub const NOTIFICATION_PROGRESS: &str = "notifications/progress";
/// `notifications/message`, the server log stream.
pub const NOTIFICATION_MESSAGE: &str = "notifications/message";
/// `notifications/roots/list_changed`, emitted by clients that declared
/// `roots.listChanged`.
pub const NOTIFICATION_ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";

/// True for any `notifications/*` method.
pub fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

//! Shared protocol types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pagination cursor: `base64url(last_item_name)`.
pub type Cursor = String;

/// Implementation information exchanged during the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Display title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Implementation version
    pub version: String,
}

impl Implementation {
    /// Create implementation info from a name and version.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            version: version.into(),
        }
    }
}

impl Default for Implementation {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            title: None,
            version: "0.0.0".to_string(),
        }
    }
}

/// Request metadata recognized under the `_meta` params key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Progress token the caller wants updates correlated with
    #[serde(rename = "progressToken", skip_serializing_if = "Option::is_none")]
    pub progress_token: Option<String>,
}

/// Extract `_meta.progressToken` from raw request params.
pub fn progress_token_of(params: Option<&Value>) -> Option<String> {
    params?
        .get("_meta")?
        .get("progressToken")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Result wrapper carrying only optional `_meta`, used for empty replies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyResult {
    /// Optional response metadata
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_token_extraction() {
        let params = json!({"name": "t", "_meta": {"progressToken": "progress_ab"}});
        assert_eq!(
            progress_token_of(Some(&params)),
            Some("progress_ab".to_string())
        );
        assert_eq!(progress_token_of(Some(&json!({"name": "t"}))), None);
        assert_eq!(progress_token_of(None), None);
    }
}

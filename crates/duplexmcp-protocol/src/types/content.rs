//! Content blocks carried by tool results and prompt messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One block of content, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// The text payload
        text: String,
    },
    /// Base64-encoded image
    Image {
        /// Base64 image data
        data: String,
        /// Image MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Base64-encoded audio
    Audio {
        /// Base64 audio data
        data: String,
        /// Audio MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Embedded resource contents
    Resource {
        /// The embedded resource
        resource: Value,
    },
}

impl ContentBlock {
    /// Build a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The user side of the conversation
    User,
    /// The assistant side of the conversation
    Assistant,
}

//! Progress and cancellation notification types.

use serde::{Deserialize, Serialize};

use crate::jsonrpc::RequestId;

/// `notifications/progress` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressParams {
    /// Token supplied by the original request's `_meta.progressToken`
    #[serde(rename = "progressToken")]
    pub progress_token: String,
    /// Progress so far
    pub progress: f64,
    /// Total work, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Optional human-readable status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `notifications/cancelled` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelledParams {
    /// Id of the request being abandoned
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    /// Why it was abandoned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CancelledParams {
    /// Build cancellation params with a reason.
    pub fn new(request_id: RequestId, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            reason: Some(reason.into()),
        }
    }
}

//! Authorization validator interface.
//!
//! Concrete validators (JWT, OAuth introspection) live outside this crate;
//! the engine only knows this contract and calls it before dispatch when an
//! authorization policy is configured on the server.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The token is malformed or otherwise unusable.
    #[error("invalid token")]
    InvalidToken,
    /// The token is past its expiry.
    #[error("expired token")]
    ExpiredToken,
    /// The token's issuer is not trusted.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// The token was minted for a different audience.
    #[error("invalid audience")]
    InvalidAudience,
    /// The token's signature does not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// Validator-specific failure.
    #[error("authorization failed: {0}")]
    Other(String),
}

/// Claims extracted from a validated token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Subject the token was issued to
    pub subject: Option<String>,
    /// Issuer
    pub issuer: Option<String>,
    /// Scopes granted
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Expiry, seconds since the Unix epoch
    pub expires_at: Option<u64>,
    /// Everything else the validator surfaced
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub claims: HashMap<String, serde_json::Value>,
}

/// Validates bearer tokens ahead of dispatch.
#[async_trait]
pub trait TokenValidator: Send + Sync + 'static {
    /// Validate `token`, returning its claims or a rejection kind.
    async fn validate_token(&self, token: &str) -> Result<TokenInfo, AuthError>;
}

//! Request-id and progress-token generation.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::jsonrpc::RequestId;

/// Generates request ids unique within one transport's lifetime.
///
/// Ids combine a 64-bit random prefix fixed at construction with a monotonic
/// counter, so concurrent connections never collide and ids stay cheap to
/// mint.
#[derive(Debug)]
pub struct RequestIdGenerator {
    prefix: u64,
    counter: AtomicU64,
}

impl RequestIdGenerator {
    /// Create a generator with a fresh random prefix.
    pub fn new() -> Self {
        Self {
            prefix: fastrand::u64(..),
            counter: AtomicU64::new(0),
        }
    }

    /// Mint the next request id.
    pub fn next_id(&self) -> RequestId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        RequestId::String(format!("{:016x}-{n}", self.prefix))
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates progress tokens.
///
/// Tokens carry a `progress_` prefix so they are distinguishable from
/// request ids in logs.
#[derive(Debug, Default)]
pub struct ProgressTokenGenerator;

impl ProgressTokenGenerator {
    /// Mint a progress token.
    pub fn next_token() -> String {
        format!("progress_{:016x}", fastrand::u64(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_non_empty() {
        let generator = RequestIdGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let RequestId::String(id) = generator.next_id() else {
                panic!("generator mints string ids");
            };
            assert!(!id.is_empty());
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn progress_tokens_are_prefixed() {
        let token = ProgressTokenGenerator::next_token();
        assert!(token.starts_with("progress_"));
        assert_ne!(token, ProgressTokenGenerator::next_token());
    }
}

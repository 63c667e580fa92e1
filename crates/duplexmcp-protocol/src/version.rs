//! Protocol version negotiation.

/// All protocol revisions this runtime understands, oldest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// The newest supported protocol revision.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Negotiate the protocol version for a session.
///
/// If the client's requested version appears in `supported` (the
/// intersection of runtime and transport support), it is used as-is.
/// Otherwise the highest supported version is offered; date-formatted
/// version strings order lexicographically.
pub fn negotiate_version(client_version: &str, supported: &[&str]) -> Option<String> {
    if supported.contains(&client_version) {
        return Some(client_version.to_string());
    }
    supported.iter().max().map(|v| (*v).to_string())
}

/// True if `version` is supported by this runtime at all.
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins() {
        assert_eq!(
            negotiate_version("2025-03-26", SUPPORTED_PROTOCOL_VERSIONS),
            Some("2025-03-26".to_string())
        );
    }

    #[test]
    fn unknown_version_falls_back_to_latest() {
        assert_eq!(
            negotiate_version("2099-01-01", SUPPORTED_PROTOCOL_VERSIONS),
            Some(LATEST_PROTOCOL_VERSION.to_string())
        );
        assert_eq!(
            negotiate_version("1.0", SUPPORTED_PROTOCOL_VERSIONS),
            Some(LATEST_PROTOCOL_VERSION.to_string())
        );
    }

    #[test]
    fn transport_restricted_set() {
        // A streamable HTTP transport does not speak 2024-11-05.
        let supported = &["2025-03-26", "2025-06-18"];
        assert_eq!(
            negotiate_version("2024-11-05", supported),
            Some("2025-06-18".to_string())
        );
    }

    #[test]
    fn empty_set_yields_none() {
        assert_eq!(negotiate_version("2025-06-18", &[]), None);
    }
}

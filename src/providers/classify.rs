//! Pattern-based error classification.
//!
//! Drives the retry policy of the offline queue and the folder engine's
//! circuit breaker. Classification prefers the structured [`ProviderError`]
//! variant; free-form messages fall back to status-code and substring
//! matching.

use super::client::ProviderError;

/// Broad class of a remote operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient transport failure.
    Network,
    /// Expired or invalid credentials; surfaced for re-authentication.
    Auth,
    /// Rate limited by the remote.
    Quota,
    /// Remote 5xx-equivalent.
    Server,
    /// Anything unrecognized; retrying will not help.
    Permanent,
}

impl ErrorClass {
    /// Returns true if the queue should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::Network | ErrorClass::Quota | ErrorClass::Server
        )
    }
}

const NETWORK_PATTERNS: &[&str] = &[
    "failed to fetch",
    "network",
    "timeout",
    "timed out",
    "econnrefused",
    "connection refused",
    "connection error",
    "connection reset",
    "econnreset",
    "enotfound",
    "dns",
    "socket hang up",
    "aborted",
    "net::err",
    "tls",
    "tcp",
];

/// Classifies a free-form error message.
///
/// A 4xx/5xx status token in the text takes priority: 401/403 are auth, 429
/// is quota, 5xx is server. Otherwise known network substrings mark the
/// error transient, and anything left is permanent.
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();

    if let Some(status) = extract_status_code(&lower) {
        match status {
            401 | 403 => return ErrorClass::Auth,
            429 => return ErrorClass::Quota,
            500..=599 => return ErrorClass::Server,
            _ => {}
        }
    }

    if NETWORK_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::Network;
    }

    ErrorClass::Permanent
}

/// Classifies a provider error, structurally where possible.
pub fn classify(error: &ProviderError) -> ErrorClass {
    match error {
        ProviderError::Authentication(_) => ErrorClass::Auth,
        ProviderError::Connection(_) => ErrorClass::Network,
        ProviderError::RateLimited { .. } => ErrorClass::Quota,
        ProviderError::Server(_) => ErrorClass::Server,
        ProviderError::CursorExpired => ErrorClass::Permanent,
        ProviderError::NotFound(msg)
        | ProviderError::InvalidRequest(msg)
        | ProviderError::Provider(msg) => classify_message(msg),
    }
}

/// Returns true for connection-class failures that should trip the folder
/// engine's circuit breaker (timeouts, TCP/TLS failures).
pub fn is_connection_error(error: &ProviderError) -> bool {
    classify(error) == ErrorClass::Network
}

/// Extracts the first standalone 4xx/5xx token from a message.
fn extract_status_code(lower: &str) -> Option<u32> {
    let bytes = lower.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let boundary_before = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
            let boundary_after = i == bytes.len() || !bytes[i].is_ascii_alphanumeric();
            if i - start == 3 && boundary_before && boundary_after {
                if let Ok(code) = lower[start..i].parse::<u32>() {
                    if (400..600).contains(&code) {
                        return Some(code);
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_401_is_auth_not_retryable() {
        let class = classify_message("HTTP 401 Unauthorized");
        assert_eq!(class, ErrorClass::Auth);
        assert!(!class.is_retryable());
    }

    #[test]
    fn http_403_is_auth() {
        assert_eq!(classify_message("request failed: 403"), ErrorClass::Auth);
    }

    #[test]
    fn failed_to_fetch_is_network_retryable() {
        let class = classify_message("Failed to fetch");
        assert_eq!(class, ErrorClass::Network);
        assert!(class.is_retryable());
    }

    #[test]
    fn http_429_is_quota_retryable() {
        let class = classify_message("HTTP 429");
        assert_eq!(class, ErrorClass::Quota);
        assert!(class.is_retryable());
    }

    #[test]
    fn five_xx_is_server() {
        assert_eq!(classify_message("HTTP 503 unavailable"), ErrorClass::Server);
        assert!(classify_message("got 500").is_retryable());
    }

    #[test]
    fn unknown_is_permanent() {
        let class = classify_message("malformed payload");
        assert_eq!(class, ErrorClass::Permanent);
        assert!(!class.is_retryable());
    }

    #[test]
    fn embedded_digits_are_not_status_codes() {
        // "os error 60" and uid-like numbers must not match as HTTP statuses.
        assert_eq!(
            classify_message("TCP connect timed out (os error 60)"),
            ErrorClass::Network
        );
        assert_eq!(classify_message("uid4010 missing"), ErrorClass::Permanent);
    }

    #[test]
    fn structured_variants_classify_directly() {
        assert_eq!(
            classify(&ProviderError::Authentication("expired".into())),
            ErrorClass::Auth
        );
        assert_eq!(
            classify(&ProviderError::Connection("reset".into())),
            ErrorClass::Network
        );
        assert_eq!(
            classify(&ProviderError::RateLimited {
                retry_after_secs: None
            }),
            ErrorClass::Quota
        );
        assert_eq!(
            classify(&ProviderError::Server("boom".into())),
            ErrorClass::Server
        );
    }

    #[test]
    fn connection_errors_trip_the_breaker() {
        assert!(is_connection_error(&ProviderError::Connection(
            "TCP connect timed out".into()
        )));
        assert!(!is_connection_error(&ProviderError::Provider(
            "PARSE failed: invalid response".into()
        )));
    }
}

//! Upstream failure classification
//!
//! Decides what a failed proxied call means for the key that served it. Only
//! revocation and quota exhaustion retire a key; a plain 429 is a per-minute
//! rate limit and leaves the pool untouched.

use openai_api::is_quota_message;

/// What an upstream failure implies for the responsible key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Timeouts, 5xx, plain rate limits. No pool action.
    Transient,
    /// Quota or billing exhausted. Disable.
    QuotaExceeded,
    /// Invalid or revoked key (401/403). Disable.
    Permanent,
    /// Key works but cannot use the premium model. Clear `is_gpt4`.
    PremiumUnavailable,
}

/// 404 body fragments meaning "this key cannot see that model".
const MODEL_DENIED_PATTERNS: &[&str] = &[
    "model_not_found",
    "does not exist or you do not have access",
];

/// Classify a 429 body as quota exhaustion or transient rate limit.
pub fn classify_429(body: &str) -> ErrorClassification {
    if is_quota_message(body) {
        ErrorClassification::QuotaExceeded
    } else {
        ErrorClassification::Transient
    }
}

/// Classify an upstream error by HTTP status and response body.
pub fn classify_status(status: u16, body: &str) -> ErrorClassification {
    match status {
        429 => classify_429(body),
        401 | 403 => ErrorClassification::Permanent,
        404 => {
            let lower = body.to_lowercase();
            if MODEL_DENIED_PATTERNS.iter().any(|p| lower.contains(p)) {
                ErrorClassification::PremiumUnavailable
            } else {
                ErrorClassification::Transient
            }
        }
        _ => ErrorClassification::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_429_insufficient_quota() {
        let body = r#"{"error":{"type":"insufficient_quota","message":"You exceeded your current quota"}}"#;
        assert_eq!(classify_429(body), ErrorClassification::QuotaExceeded);
    }

    #[test]
    fn classify_429_billing_not_active() {
        let body = r#"{"error":{"code":"billing_not_active"}}"#;
        assert_eq!(classify_429(body), ErrorClassification::QuotaExceeded);
    }

    #[test]
    fn classify_429_terminated_account() {
        let body = r#"{"error":{"message":"Your access was terminated due to violation of our policies"}}"#;
        assert_eq!(classify_429(body), ErrorClassification::QuotaExceeded);
    }

    #[test]
    fn classify_429_rate_limit_is_transient() {
        let body = r#"{"error":{"type":"requests","message":"Rate limit reached for default-gpt-3.5-turbo"}}"#;
        assert_eq!(classify_429(body), ErrorClassification::Transient);
    }

    #[test]
    fn classify_429_case_insensitive() {
        let body = r#"{"error":{"message":"YOU EXCEEDED YOUR CURRENT QUOTA"}}"#;
        assert_eq!(classify_429(body), ErrorClassification::QuotaExceeded);
    }

    #[test]
    fn classify_status_auth_failures_are_permanent() {
        assert_eq!(
            classify_status(401, "invalid_api_key"),
            ErrorClassification::Permanent
        );
        assert_eq!(
            classify_status(403, "forbidden"),
            ErrorClassification::Permanent
        );
    }

    #[test]
    fn classify_status_model_not_found_downgrades() {
        let body = r#"{"error":{"code":"model_not_found","message":"The model `gpt-4` does not exist or you do not have access to it."}}"#;
        assert_eq!(
            classify_status(404, body),
            ErrorClassification::PremiumUnavailable
        );
    }

    #[test]
    fn classify_status_plain_404_is_transient() {
        assert_eq!(
            classify_status(404, "not found"),
            ErrorClassification::Transient
        );
    }

    #[test]
    fn classify_status_server_errors_are_transient() {
        for status in [408, 500, 502, 503, 504] {
            assert_eq!(
                classify_status(status, "upstream trouble"),
                ErrorClassification::Transient,
                "status {status}"
            );
        }
    }
}

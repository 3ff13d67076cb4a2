//! Error types for provider API calls

/// Errors from OpenAI API calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// 401: the key is invalid or revoked.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// 429 naming a quota or billing condition: the key cannot serve traffic.
    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),

    /// 429 without a quota marker: transient.
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("response parse error: {0}")]
    Parse(String),
}

/// Result alias for API calls.
pub type Result<T> = std::result::Result<T, Error>;

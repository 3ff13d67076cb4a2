//! Error types for request rewriting and response translation

/// Why a single pipeline step refused the request.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    /// The pool has no key for this request.
    #[error("{0}")]
    NoKeyAvailable(String),

    /// The legacy body cannot be translated.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Content rejected by operator policy.
    #[error("{0}")]
    PolicyViolation(String),

    /// A step could not do its job for reasons the client did not cause.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A rewrite failure tagged with the step that raised it.
#[derive(Debug, thiserror::Error)]
#[error("pipeline step {step} failed: {source}")]
pub struct PipelineError {
    pub step: &'static str,
    #[source]
    pub source: RewriteError,
}

/// Errors from the response translation stage.
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("failed to decode upstream body: {0}")]
    Decode(String),

    #[error("malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),
}

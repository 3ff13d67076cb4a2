//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No usable credentials were configured. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Nothing selectable for this request.
    #[error("{0}")]
    NoKeyAvailable(String),

    /// A hash that matches no record; indicates a checker bug.
    #[error("unknown key: {0}")]
    UnknownKey(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

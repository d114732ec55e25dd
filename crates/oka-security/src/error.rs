//! Errors raised while building the verification stage.

/// Result alias for token and gate construction.
pub type Result<T> = std::result::Result<T, SecurityError>;

/// Failure to set up cookie verification for a listener.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// HMAC rejected the listener secret.
    #[error("listener secret cannot key HMAC-SHA256: {0}")]
    InvalidKey(String),
}

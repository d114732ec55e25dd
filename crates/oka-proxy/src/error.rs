//! Proxy error types.

use oka_resilience::BulkheadError;
use std::time::Duration;

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Proxy error type.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The upstream URL is unusable.
    #[error("Invalid target URL {url}: {reason}")]
    InvalidTarget {
        /// Configured URL
        url: String,
        /// What is wrong with it
        reason: String,
    },

    /// The HTTP client could not be built.
    #[error("Failed to build upstream client: {0}")]
    Client(String),

    /// Connecting to or exchanging with the upstream failed.
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// No response head within the deadline.
    #[error("Upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// The response body stopped arriving or ran past the exchange deadline.
    #[error("Upstream body stalled, no data within {0:?}")]
    BodyStalled(Duration),

    /// Too many concurrent upstream exchanges.
    #[error(transparent)]
    Saturated(#[from] BulkheadError),
}

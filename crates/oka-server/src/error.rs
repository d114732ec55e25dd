//! Server error types.

use oka_proxy::ProxyError;
use oka_security::SecurityError;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type for listener management
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors raised while starting or running listeners
#[derive(Debug, Error)]
pub enum ServerError {
    /// No listener is configured
    #[error("No server configurations found")]
    NoServers,

    /// Every configured listener failed to start
    #[error("No listener could be started ({failed} failed)")]
    NoListeners {
        /// Number of listeners that failed
        failed: usize,
    },

    /// The listening socket could not be bound
    #[error("Server '{name}' failed to bind {addr}: {source}")]
    Bind {
        /// Listener name
        name: String,
        /// Requested address
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Certificate or key could not be loaded
    #[error("Server '{name}' failed to load TLS material: {reason}")]
    Tls {
        /// Listener name
        name: String,
        /// What went wrong
        reason: String,
    },

    /// The accept loop failed
    #[error("Server '{name}' stopped with error: {source}")]
    Serve {
        /// Listener name
        name: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Token key rejected
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// Forwarding engine could not be built
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl ServerError {
    /// Create a TLS error
    pub fn tls(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Tls {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

//! # OkaProxy Server
//!
//! Runs one axum listener per configured server:
//! - [`routes`]: `/health`, `/status` and the proxied fallback
//! - [`middleware`]: admission pipeline and access logging
//! - [`listener`]: socket binding, TLS and per-listener lifecycle
//! - [`conn`]: inactivity limits on client connections
//! - [`manager`]: starts every listener and shuts them down together
//! - [`shutdown`]: signal handling and draining under a deadline

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod conn;
pub mod error;
pub mod listener;
pub mod manager;
pub mod middleware;
pub mod pages;
pub mod routes;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use conn::{
    ConnectionTimeouts, IdleTimeoutAcceptor, IdleTimeoutStream, CONNECTION_IDLE_TIMEOUT,
    WRITE_TIMEOUT,
};
pub use error::{Result, ServerError};
pub use listener::{
    Listener, ListenerControl, ListenerPhase, HEADER_READ_TIMEOUT, TLS_HANDSHAKE_TIMEOUT,
};
pub use manager::{ServerManager, SharedResources};
pub use pages::{Pages, DEFAULT_CHALLENGE_PAGE};
pub use routes::{listener_router, ListenerRoutes};
pub use shutdown::{shutdown_signal, ShutdownReport};

//! Integration tests for OkaProxy
//!
//! Each test starts a real [`oka_server::ServerManager`] on ephemeral ports in
//! front of a `wiremock` upstream and drives it over HTTP:
//! - Verification challenge and cookie replay
//! - Rate limiting, scopes and fail-open behavior
//! - Forwarding header contract and gateway errors
//! - Graceful shutdown

pub mod fixtures;
pub mod helpers;

// Re-export commonly used items
pub use fixtures::*;
pub use helpers::*;

#[cfg(test)]
mod lifecycle_tests;
#[cfg(test)]
mod proxy_tests;
#[cfg(test)]
mod rate_limit_tests;
#[cfg(test)]
mod redis_tests;
#[cfg(test)]
mod verification_tests;

//! # OkaProxy Forwarding
//!
//! One [`ProxyEngine`] per listener relays admitted requests to its upstream,
//! rewriting forwarding headers on the way in and hardening headers on the way
//! out. Upstream failures become a 502 page, never a retry.
//!
//! The [`status`] handlers answer `/health` and `/status` without touching the
//! admission pipeline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod headers;
pub mod status;

pub use engine::{proxy_handler, EngineConfig, ProxyEngine, DEFAULT_GATEWAY_ERROR_PAGE};
pub use error::{ProxyError, Result};
pub use status::{health_handler, status_handler, HealthResponse, StatusResponse, StatusState};

//! # OkaProxy Configuration
//!
//! TOML configuration for the proxy: the global rate limit, the Redis store,
//! page locations, logging, shutdown timing, and one `[[server]]` table per
//! listener.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod model;

pub use error::{ConfigError, Result};
pub use loader::{load_config, parse_config, REDIS_URL_ENV};
pub use model::{
    HttpsSettings, LimitOverride, LimitScope, LimitSettings, LogFormat, LoggingSettings,
    PagesSettings, ProxyConfig, RedisSettings, ServerSpec, ShutdownSettings,
};

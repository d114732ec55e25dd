//! Configuration model.

use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

/// Top-level proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Global rate limit.
    #[serde(default)]
    pub limit: LimitSettings,

    /// Counter store connection.
    #[serde(default)]
    pub redis: RedisSettings,

    /// Static page locations.
    #[serde(default)]
    pub pages: PagesSettings,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Shutdown timing.
    #[serde(default)]
    pub shutdown: ShutdownSettings,

    /// One entry per listener.
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerSpec>,
}

impl ProxyConfig {
    /// Effective limit for a listener, applying its override if any.
    #[must_use]
    pub fn limit_for(&self, spec: &ServerSpec) -> LimitSettings {
        let mut limit = self.limit.clone();
        if let Some(ref overrides) = spec.limit {
            if let Some(count) = overrides.count {
                limit.count = count;
            }
            if let Some(window) = overrides.window {
                limit.window = window;
            }
        }
        limit
    }
}

/// How rate counters are shared between listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    /// One counter per client across every listener.
    #[default]
    Global,
    /// One counter per client per listener.
    PerListener,
}

/// Fixed-window rate limit settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LimitSettings {
    /// Requests allowed per window. Zero disables limiting.
    #[serde(default = "default_limit_count")]
    pub count: u64,

    /// Window length in seconds. Zero disables limiting.
    #[serde(default = "default_limit_window")]
    pub window: u64,

    /// Counter sharing.
    #[serde(default)]
    pub scope: LimitScope,

    /// Key prefix in the counter store.
    #[serde(default = "default_key_prefix")]
    #[validate(length(min = 1, max = 64))]
    pub key_prefix: String,
}

impl LimitSettings {
    /// Whether limiting is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.count > 0 && self.window > 0
    }
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            count: default_limit_count(),
            window: default_limit_window(),
            scope: LimitScope::default(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_limit_count() -> u64 {
    100
}

fn default_limit_window() -> u64 {
    60
}

fn default_key_prefix() -> String {
    "rate_limit".to_string()
}

/// Per-listener limit override.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitOverride {
    /// Requests allowed per window.
    pub count: Option<u64>,
    /// Window length in seconds.
    pub window: Option<u64>,
}

/// Redis connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Connection URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Bound on each counter operation.
    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    pub operation_timeout: Duration,

    /// Bound on establishing the connection.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            operation_timeout: default_operation_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Static page locations.
#[derive(Debug, Clone, Deserialize)]
pub struct PagesSettings {
    /// Challenge page served to unverified clients.
    #[serde(default = "default_challenge_page")]
    pub challenge: PathBuf,

    /// Page served when the upstream fails.
    #[serde(default = "default_gateway_error_page")]
    pub gateway_error: PathBuf,
}

impl Default for PagesSettings {
    fn default() -> Self {
        Self {
            challenge: default_challenge_page(),
            gateway_error: default_gateway_error_page(),
        }
    }
}

fn default_challenge_page() -> PathBuf {
    PathBuf::from("public/verification.html")
}

fn default_gateway_error_page() -> PathBuf {
    PathBuf::from("public/502.html")
}

/// Console log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Default level filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Console format.
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for the rolling `combined.log` file.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Shutdown settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSettings {
    /// Time allowed for in-flight requests to finish.
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    pub grace_period: Duration,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
        }
    }
}

fn default_grace_period() -> Duration {
    Duration::from_secs(30)
}

/// TLS settings for a listener.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpsSettings {
    /// Serve TLS on this listener.
    #[serde(default)]
    pub enabled: bool,
    /// PEM certificate chain.
    pub cert_path: Option<PathBuf>,
    /// PEM private key.
    pub key_path: Option<PathBuf>,
}

/// One listener.
#[derive(Clone, Deserialize, Validate)]
pub struct ServerSpec {
    /// Unique listener name.
    #[validate(length(min = 1, max = 128))]
    pub name: String,

    /// TCP port.
    #[validate(range(min = 1))]
    pub port: u16,

    /// Address to bind.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Upstream base URL.
    #[validate(url)]
    pub target_url: String,

    /// HMAC key for verification tokens.
    pub secret_key: SecretString,

    /// Token lifetime in seconds.
    #[validate(range(min = 1))]
    pub expired: u64,

    /// Maximum concurrent upstream connections. Zero means unlimited.
    #[serde(default)]
    pub ctn_max: usize,

    /// TLS settings.
    #[serde(default)]
    pub https: HttpsSettings,

    /// Optional limit override.
    #[serde(default)]
    pub limit: Option<LimitOverride>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

impl ServerSpec {
    /// Socket address to bind.
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Whether this listener serves TLS.
    #[must_use]
    pub const fn tls_enabled(&self) -> bool {
        self.https.enabled
    }

    /// Token lifetime.
    #[must_use]
    pub const fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.expired)
    }
}

impl fmt::Debug for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSpec")
            .field("name", &self.name)
            .field("port", &self.port)
            .field("bind_address", &self.bind_address)
            .field("target_url", &self.target_url)
            .field("secret_key", &"[REDACTED]")
            .field("expired", &self.expired)
            .field("ctn_max", &self.ctn_max)
            .field("https", &self.https)
            .field("limit", &self.limit)
            .finish()
    }
}

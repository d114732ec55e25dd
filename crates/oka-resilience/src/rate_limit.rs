//! Per-client fixed-window rate limiting.
//!
//! The limiter fails open: when the counter store is unavailable the request
//! is admitted and the failure is logged.

use crate::store::CounterStore;
use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::RETRY_AFTER;
use http::request::Parts;
use http::{HeaderValue, StatusCode};
use oka_core::{ClientIdentity, Stage, StageOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Body message of a rejected request.
pub const RATE_LIMIT_MESSAGE: &str = "Too many requests, please try again later.";

/// Whether counters are shared between listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyScope {
    /// `<prefix>:<client>`
    #[default]
    Global,
    /// `<prefix>:<listener>:<client>`
    PerListener,
}

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub count: u64,
    /// Window length in whole seconds
    pub window_secs: u64,
    /// Counter sharing
    pub scope: KeyScope,
    /// Key namespace
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            count: 100,
            window_secs: 60,
            scope: KeyScope::Global,
            key_prefix: "rate_limit".to_string(),
        }
    }
}

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Limiting is switched off.
    Disabled,
    /// Within the limit; carries the post-increment count.
    Allowed(u64),
    /// Over the limit; carries the post-increment count.
    Limited(u64),
    /// The store failed and the request was admitted.
    FailedOpen,
}

/// Rate limit stage for one listener.
pub struct RateLimiter {
    server: String,
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter backed by `store`.
    #[must_use]
    pub fn new(
        server: impl Into<String>,
        store: Arc<dyn CounterStore>,
        config: RateLimitConfig,
    ) -> Self {
        Self {
            server: server.into(),
            store,
            config,
        }
    }

    /// Whether both the ceiling and the window are non-zero.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.count > 0 && self.config.window_secs > 0
    }

    /// Counter key for a client.
    #[must_use]
    pub fn key_for(&self, client: &ClientIdentity) -> String {
        match self.config.scope {
            KeyScope::Global => format!("{}:{}", self.config.key_prefix, client),
            KeyScope::PerListener => {
                format!("{}:{}:{}", self.config.key_prefix, self.server, client)
            }
        }
    }

    /// Count this request and decide.
    pub async fn check(&self, client: &ClientIdentity) -> RateDecision {
        if !self.is_enabled() {
            return RateDecision::Disabled;
        }

        let key = self.key_for(client);
        let window = Duration::from_secs(self.config.window_secs);
        match self.store.increment(&key, window).await {
            Ok(count) if count > self.config.count => RateDecision::Limited(count),
            Ok(count) => RateDecision::Allowed(count),
            Err(err) => {
                error!(
                    server = %self.server,
                    client = %client,
                    store = self.store.name(),
                    error = %err,
                    "Rate limit store unavailable, admitting request"
                );
                RateDecision::FailedOpen
            }
        }
    }

    /// The 429 answer.
    #[must_use]
    pub fn limited_response(&self) -> Response {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({ "message": RATE_LIMIT_MESSAGE })),
        )
            .into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(self.config.window_secs));
        response
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("server", &self.server)
            .field("store", &self.store.name())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl Stage for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn evaluate(&self, request: &Parts, client: &ClientIdentity) -> StageOutcome {
        match self.check(client).await {
            RateDecision::Limited(count) => {
                info!(
                    server = %self.server,
                    client = %client,
                    method = %request.method,
                    path = %request.uri.path(),
                    count,
                    limit = self.config.count,
                    "[RATE LIMIT] Request blocked"
                );
                StageOutcome::Respond(self.limited_response())
            }
            _ => StageOutcome::Continue,
        }
    }
}

//! Liveness and upstream status endpoints.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// `/health` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests
    pub status: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
    /// Proxy version
    pub version: String,
}

/// `/status` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Listener name
    pub server_name: String,
    /// Upstream base URL
    pub target_url: String,
    /// Result of probing the upstream
    pub target_status: String,
    /// Seconds since the listener started
    pub uptime_seconds: u64,
    /// RFC 3339 timestamp
    pub timestamp: String,
}

/// Shared state for the status endpoint of one listener.
#[derive(Debug, Clone)]
pub struct StatusState {
    server_name: String,
    target_url: String,
    started_at: Instant,
    probe: reqwest::Client,
}

impl StatusState {
    /// Default probe timeout.
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create the state. The probe client gives up after `probe_timeout`.
    ///
    /// # Errors
    /// Returns error if the probe client cannot be built.
    pub fn new(
        server_name: impl Into<String>,
        target_url: impl Into<String>,
        probe_timeout: Duration,
    ) -> crate::Result<Self> {
        let probe = reqwest::Client::builder()
            .timeout(probe_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| crate::ProxyError::Client(e.to_string()))?;

        Ok(Self {
            server_name: server_name.into(),
            target_url: target_url.into(),
            started_at: Instant::now(),
            probe,
        })
    }

    /// Probe the upstream once.
    pub async fn probe_target(&self) -> String {
        match self.probe.get(&self.target_url).send().await {
            Ok(response) => format!("reachable (status: {})", response.status().as_u16()),
            Err(err) => {
                debug!(server = %self.server_name, error = %err, "Status probe failed");
                format!("unreachable: {err}")
            }
        }
    }
}

/// Liveness endpoint
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Upstream status endpoint
pub async fn status_handler(State(state): State<Arc<StatusState>>) -> Json<StatusResponse> {
    let target_status = state.probe_target().await;
    Json(StatusResponse {
        server_name: state.server_name.clone(),
        target_url: state.target_url.clone(),
        target_status,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

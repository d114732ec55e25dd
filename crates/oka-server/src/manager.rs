//! Starts every configured listener and shuts them down together.

use crate::error::{Result, ServerError};
use crate::listener::{Listener, ListenerControl};
use crate::pages::Pages;
use crate::routes::{listener_router, ListenerRoutes};
use crate::shutdown::{drain_listeners, log_exit, ShutdownReport};
use oka_config::{LimitScope, LimitSettings, ProxyConfig, ServerSpec};
use oka_core::Pipeline;
use oka_proxy::{EngineConfig, ProxyEngine, StatusState};
use oka_resilience::{CounterStore, KeyScope, RateLimitConfig, RateLimiter};
use oka_security::{TokenCodec, VerificationGate};
use oka_telemetry::{DisabledGeoLocator, GeoLocator, LogGuard};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Resources shared by every listener and released once at shutdown.
pub struct SharedResources {
    /// Rate limit counters
    pub store: Arc<dyn CounterStore>,
    /// Challenge and gateway error pages
    pub pages: Pages,
    /// Location lookup for logs
    pub geo: Arc<dyn GeoLocator>,
    /// File log sink, flushed last
    pub log_guard: Option<LogGuard>,
}

impl SharedResources {
    /// Resources with geolocation disabled and no file sink.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, pages: Pages) -> Self {
        Self {
            store,
            pages,
            geo: Arc::new(DisabledGeoLocator),
            log_guard: None,
        }
    }

    /// Use a geolocation backend
    #[must_use]
    pub fn with_geo(mut self, geo: Arc<dyn GeoLocator>) -> Self {
        self.geo = geo;
        self
    }

    /// Keep the log sink alive until shutdown completes
    #[must_use]
    pub fn with_log_guard(mut self, guard: LogGuard) -> Self {
        self.log_guard = Some(guard);
        self
    }
}

/// Owns all running listeners.
pub struct ServerManager {
    listeners: Vec<ListenerControl>,
    tasks: JoinSet<Result<()>>,
    grace_period: Duration,
    store: Arc<dyn CounterStore>,
    log_guard: Option<LogGuard>,
}

impl ServerManager {
    /// Start one listener per configured server.
    ///
    /// A listener that fails to bind or load its certificate is logged and
    /// skipped.
    ///
    /// # Errors
    /// Returns error if no server is configured or none could be started.
    pub async fn start(config: &ProxyConfig, resources: SharedResources) -> Result<Self> {
        if config.servers.is_empty() {
            resources.store.close().await;
            return Err(ServerError::NoServers);
        }

        let mut listeners = Vec::with_capacity(config.servers.len());
        let mut tasks = JoinSet::new();
        let mut failed = 0;

        for spec in &config.servers {
            match prepare_listener(spec, &config.limit_for(spec), &resources).await {
                Ok(listener) => {
                    listeners.push(listener.control());
                    tasks.spawn(listener.serve());
                }
                Err(err) => {
                    failed += 1;
                    error!(server = %spec.name, error = %err, "Failed to start server");
                }
            }
        }

        if listeners.is_empty() {
            resources.store.close().await;
            return Err(ServerError::NoListeners { failed });
        }

        info!(
            started = listeners.len(),
            failed,
            store = resources.store.name(),
            "Started proxy servers"
        );

        Ok(Self {
            listeners,
            tasks,
            grace_period: config.shutdown.grace_period,
            store: resources.store,
            log_guard: resources.log_guard,
        })
    }

    /// Running listeners
    #[must_use]
    pub fn listeners(&self) -> &[ListenerControl] {
        &self.listeners
    }

    /// Bound address of the named listener
    #[must_use]
    pub fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.name() == name)
            .map(ListenerControl::local_addr)
    }

    /// Time allowed for in-flight requests at shutdown
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Resolve once every listener has stopped on its own.
    ///
    /// Cancel safe; a failing listener does not affect the others.
    pub async fn wait(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            log_exit(joined);
        }
    }

    /// Stop all listeners, wait up to the grace period for in-flight
    /// requests, then release the store and the log sink.
    pub async fn shutdown(mut self) -> ShutdownReport {
        info!(
            listeners = self.listeners.len(),
            grace_ms = self.grace_period.as_millis() as u64,
            "Starting graceful shutdown"
        );

        for listener in &self.listeners {
            listener.begin_shutdown(self.grace_period);
        }

        let report = drain_listeners(&mut self.tasks, self.grace_period).await;

        self.store.close().await;
        info!(
            stopped = report.stopped,
            failed = report.failed,
            aborted = report.aborted,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Shutdown completed"
        );

        if let Some(guard) = self.log_guard.take() {
            guard.flush();
        }
        report
    }
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("listeners", &self.listeners)
            .field("grace_period", &self.grace_period)
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

async fn prepare_listener(
    spec: &ServerSpec,
    limit: &LimitSettings,
    resources: &SharedResources,
) -> Result<Listener> {
    let codec = TokenCodec::new(&spec.secret_key)?;
    let gate = VerificationGate::new(
        spec.name.as_str(),
        codec,
        spec.token_lifetime(),
        resources.pages.challenge.clone(),
    );
    let limiter = RateLimiter::new(
        spec.name.as_str(),
        Arc::clone(&resources.store),
        rate_limit_config(limit),
    );
    let pipeline = Pipeline::new()
        .with_stage(Arc::new(gate))
        .with_stage(Arc::new(limiter));

    let engine = ProxyEngine::new(
        EngineConfig::new(spec.name.as_str(), spec.target_url.as_str())
            .with_tls(spec.tls_enabled())
            .with_max_connections(spec.ctn_max)
            .with_error_page(resources.pages.gateway_error.clone()),
        Arc::clone(&resources.geo),
    )?;
    let status = StatusState::new(
        spec.name.as_str(),
        spec.target_url.as_str(),
        StatusState::PROBE_TIMEOUT,
    )?;

    let router = listener_router(ListenerRoutes {
        server_name: spec.name.clone(),
        tls: spec.tls_enabled(),
        pipeline: Arc::new(pipeline),
        engine: Arc::new(engine),
        status: Arc::new(status),
        geo: Arc::clone(&resources.geo),
    });

    Listener::bind(spec, router).await
}

fn rate_limit_config(limit: &LimitSettings) -> RateLimitConfig {
    RateLimitConfig {
        count: limit.count,
        window_secs: limit.window,
        scope: match limit.scope {
            LimitScope::Global => KeyScope::Global,
            LimitScope::PerListener => KeyScope::PerListener,
        },
        key_prefix: limit.key_prefix.clone(),
    }
}

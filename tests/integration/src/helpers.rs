//! Test helper utilities for integration tests

use async_trait::async_trait;
use oka_config::ProxyConfig;
use oka_resilience::{CounterStore, MemoryCounterStore, StoreError, StoreResult};
use oka_server::{Pages, ServerManager, SharedResources, ShutdownReport};
use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Client, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// A running proxy with one or more listeners.
pub struct TestProxy {
    manager: Option<ServerManager>,
    /// Counter store shared by the listeners
    pub store: Arc<dyn CounterStore>,
    /// HTTP client that never follows redirects
    pub client: Client,
}

impl TestProxy {
    /// Start `config` with an in-memory counter store.
    pub async fn start(config: ProxyConfig) -> Self {
        Self::start_with_store(config, Arc::new(MemoryCounterStore::new())).await
    }

    /// Start `config` with a given counter store.
    pub async fn start_with_store(config: ProxyConfig, store: Arc<dyn CounterStore>) -> Self {
        init_tracing();

        let resources = SharedResources::new(Arc::clone(&store), Pages::default());
        let manager = ServerManager::start(&config, resources)
            .await
            .expect("proxy should start");

        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create client");

        Self {
            manager: Some(manager),
            store,
            client,
        }
    }

    /// The running manager
    pub fn manager(&self) -> &ServerManager {
        self.manager.as_ref().expect("proxy already shut down")
    }

    /// Bound address of a listener
    pub fn addr(&self, name: &str) -> SocketAddr {
        self.manager
            .as_ref()
            .and_then(|m| m.local_addr(name))
            .unwrap_or_else(|| panic!("no listener named {name}"))
    }

    /// Full URL of `path` on a listener
    pub fn url(&self, name: &str, path: &str) -> String {
        format!("http://{}{}", self.addr(name), path)
    }

    /// GET on the `site` listener
    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url("site", path))
            .send()
            .await
            .expect("Request failed")
    }

    /// GET on the `site` listener with a `Cookie` header
    pub async fn get_with_cookie(&self, path: &str, cookie: &str) -> Response {
        self.get_from("site", path, cookie).await
    }

    /// GET on a named listener with a `Cookie` header
    pub async fn get_from(&self, name: &str, path: &str, cookie: &str) -> Response {
        self.client
            .get(self.url(name, path))
            .header("cookie", cookie)
            .send()
            .await
            .expect("Request failed")
    }

    /// Stop every listener and release shared resources
    pub async fn shutdown(&mut self) -> ShutdownReport {
        self.manager
            .take()
            .expect("proxy already shut down")
            .shutdown()
            .await
    }
}

/// Collect `name=value` pairs from `Set-Cookie` headers into a `Cookie`
/// header value, skipping removal cookies.
pub fn cookies_from(headers: &HeaderMap) -> String {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| !v.contains("Max-Age=0"))
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Assert the response status
pub fn assert_status(response: &Response, expected: u16) {
    assert_eq!(
        response.status().as_u16(),
        expected,
        "unexpected status for {}",
        response.url()
    );
}

/// Counter store that always fails, as an unreachable Redis would.
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl CounterStore for FailingStore {
    async fn increment(&self, _key: &str, _window: Duration) -> StoreResult<u64> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn close(&self) {}

    fn name(&self) -> &'static str {
        "failing"
    }
}

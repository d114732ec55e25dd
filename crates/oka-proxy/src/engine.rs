//! Upstream forwarding.

use crate::error::{ProxyError, Result};
use crate::headers::{
    is_websocket_upgrade, outbound_headers, rewrite_response_headers, X_PROXY_ERROR,
};
use axum::body::{Body, HttpBody};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode, Uri};
use oka_core::ClientIdentity;
use oka_resilience::{Bulkhead, BulkheadConfig, BulkheadPermit};
use oka_telemetry::GeoLocator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Page served on upstream failure when none is configured.
pub const DEFAULT_GATEWAY_ERROR_PAGE: &str = "<!DOCTYPE html>\n<html>\n<head><title>502 Bad Gateway</title></head>\n<body>\n<h1>502 Bad Gateway</h1>\n<p>The upstream server is currently unavailable. Please try again later.</p>\n</body>\n</html>\n";

/// Forwarding settings for one listener.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Listener name, for logs and the bulkhead id
    pub server_name: String,
    /// Upstream base URL
    pub target_url: String,
    /// Whether the listener terminates TLS
    pub tls: bool,
    /// Maximum concurrent upstream exchanges, zero for unlimited
    pub max_connections: usize,
    /// TCP connect plus TLS handshake bound
    pub connect_timeout: Duration,
    /// Bound on receiving the response head
    pub response_timeout: Duration,
    /// Longest silence between two reads from the upstream
    pub read_timeout: Duration,
    /// Bound on the whole exchange, body included
    pub exchange_timeout: Duration,
    /// How long idle pooled connections are kept
    pub pool_idle_timeout: Duration,
    /// TCP keepalive interval
    pub tcp_keepalive: Duration,
    /// Idle pooled connections kept when unlimited
    pub max_idle_per_host: usize,
    /// Body of the 502 page
    pub error_page: Bytes,
}

impl EngineConfig {
    /// Defaults for an upstream.
    #[must_use]
    pub fn new(server_name: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            target_url: target_url.into(),
            tls: false,
            max_connections: 0,
            connect_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            exchange_timeout: Duration::from_secs(120),
            pool_idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Duration::from_secs(30),
            max_idle_per_host: 100,
            error_page: Bytes::from_static(DEFAULT_GATEWAY_ERROR_PAGE.as_bytes()),
        }
    }

    /// Mark the listener as TLS terminating
    #[must_use]
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Limit concurrent upstream exchanges
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Bound on receiving the response head
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Longest silence tolerated while reading the upstream
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Bound on the whole exchange
    #[must_use]
    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    /// Bound on connecting
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replace the 502 page
    #[must_use]
    pub fn with_error_page(mut self, page: impl Into<Bytes>) -> Self {
        self.error_page = page.into();
        self
    }
}

/// Relays requests of one listener to its upstream.
pub struct ProxyEngine {
    config: EngineConfig,
    target: Url,
    upstream_host: HeaderValue,
    client: reqwest::Client,
    bulkhead: Bulkhead,
    geo: Arc<dyn GeoLocator>,
}

impl ProxyEngine {
    /// Parse the target and build the pooled client.
    ///
    /// # Errors
    /// Returns error if the target is not an absolute http(s) URL or the
    /// client cannot be built.
    pub fn new(config: EngineConfig, geo: Arc<dyn GeoLocator>) -> Result<Self> {
        let invalid = |reason: &str| ProxyError::InvalidTarget {
            url: config.target_url.clone(),
            reason: reason.to_string(),
        };

        let target = Url::parse(&config.target_url).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        let host = target.host_str().ok_or_else(|| invalid("missing host"))?;
        let authority = match target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let upstream_host =
            HeaderValue::from_str(&authority).map_err(|e| invalid(&e.to_string()))?;

        let idle_per_host = if config.max_connections > 0 {
            config.max_connections
        } else {
            config.max_idle_per_host
        };

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(idle_per_host)
            .tcp_keepalive(config.tcp_keepalive)
            .build()
            .map_err(|e| ProxyError::Client(e.to_string()))?;

        let bulkhead = Bulkhead::new(
            config.server_name.clone(),
            BulkheadConfig {
                max_concurrent: config.max_connections,
                queue_timeout: config.connect_timeout,
            },
        );

        Ok(Self {
            config,
            target,
            upstream_host,
            client,
            bulkhead,
            geo,
        })
    }

    /// Listener name
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }

    /// Upstream base URL
    #[must_use]
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Upstream URL for an inbound request target.
    ///
    /// The inbound path is joined onto the base path with exactly one slash;
    /// base and inbound queries are concatenated with `&`.
    #[must_use]
    pub fn upstream_url(&self, uri: &Uri) -> Url {
        let mut url = self.target.clone();
        url.set_path(&join_paths(self.target.path(), uri.path()));

        let query = match (self.target.query(), uri.query()) {
            (Some(base), Some(extra)) if !base.is_empty() => Some(format!("{base}&{extra}")),
            (_, Some(extra)) => Some(extra.to_string()),
            (Some(base), None) => Some(base.to_string()),
            (None, None) => None,
        };
        url.set_query(query.as_deref());
        url
    }

    /// Forward one request. Never fails: upstream errors become a 502 page.
    pub async fn forward(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let client = parts
            .extensions
            .get::<ClientIdentity>()
            .cloned()
            .unwrap_or_else(|| ClientIdentity::from_parts(&parts));

        if is_websocket_upgrade(&parts.headers) {
            debug!(
                server = %self.config.server_name,
                client = %client,
                path = %parts.uri.path(),
                "Rejecting WebSocket upgrade"
            );
            return (
                StatusCode::NOT_IMPLEMENTED,
                "WebSocket proxy not fully implemented",
            )
                .into_response();
        }

        let started = Instant::now();
        let method = parts.method.clone();
        let url = self.upstream_url(&parts.uri);

        match self.exchange(&parts, body, &client, url.clone()).await {
            Ok(response) => {
                debug!(
                    server = %self.config.server_name,
                    client = %client,
                    method = %method,
                    upstream = %url,
                    status = response.status().as_u16(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Proxied request"
                );
                response
            }
            Err(err) => self.gateway_error(&method, &url, &client, &err),
        }
    }

    async fn exchange(
        &self,
        parts: &http::request::Parts,
        body: Body,
        client: &ClientIdentity,
        url: Url,
    ) -> Result<Response> {
        let deadline = tokio::time::Instant::now() + self.config.exchange_timeout;
        let permit = self.bulkhead.acquire().await?;

        let headers = outbound_headers(&parts.headers, client, &self.upstream_host, self.config.tls);
        let mut upstream_request = self
            .client
            .request(parts.method.clone(), url)
            .headers(headers);
        if !body.is_end_stream() {
            upstream_request =
                upstream_request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let head_deadline = deadline.min(tokio::time::Instant::now() + self.config.response_timeout);
        let upstream = tokio::time::timeout_at(head_deadline, upstream_request.send())
            .await
            .map_err(|_| ProxyError::Timeout(self.config.response_timeout))??;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        rewrite_response_headers(&mut headers);

        let body = self.relay_body(upstream.bytes_stream().boxed(), permit, deadline);

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    /// Relay the upstream body, failing it once no chunk arrives within
    /// `read_timeout` or `deadline` passes. The permit is released when the
    /// body ends, fails or is dropped.
    fn relay_body(
        &self,
        upstream: BoxStream<'static, reqwest::Result<Bytes>>,
        permit: BulkheadPermit,
        deadline: tokio::time::Instant,
    ) -> Body {
        let read_timeout = self.config.read_timeout;
        let server: Arc<str> = Arc::from(self.config.server_name.as_str());

        let chunks = stream::unfold(Some((upstream, permit)), move |relay| {
            let server = Arc::clone(&server);
            async move {
                let Some((mut upstream, permit)) = relay else {
                    return None;
                };
                let limit = deadline.min(tokio::time::Instant::now() + read_timeout);
                match tokio::time::timeout_at(limit, upstream.next()).await {
                    Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some((upstream, permit)))),
                    Ok(Some(Err(err))) => Some((Err(ProxyError::Upstream(err)), None)),
                    Ok(None) => None,
                    Err(_) => {
                        warn!(server = %server, "Upstream body stalled, aborting response");
                        Some((Err(ProxyError::BodyStalled(read_timeout)), None))
                    }
                }
            }
        });

        Body::from_stream(chunks)
    }

    fn gateway_error(
        &self,
        method: &Method,
        url: &Url,
        client: &ClientIdentity,
        err: &ProxyError,
    ) -> Response {
        warn!(
            server = %self.config.server_name,
            client = %client,
            location = %self.geo.locate(client.as_str()),
            method = %method,
            upstream = %url,
            error = %err,
            "Upstream request failed"
        );

        (
            StatusCode::BAD_GATEWAY,
            [
                (CONTENT_TYPE, "text/html; charset=utf-8"),
                (http::HeaderName::from_static(X_PROXY_ERROR), "true"),
            ],
            self.config.error_page.clone(),
        )
            .into_response()
    }
}

impl std::fmt::Debug for ProxyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEngine")
            .field("server", &self.config.server_name)
            .field("target", &self.target.as_str())
            .field("bulkhead", &self.bulkhead)
            .finish_non_exhaustive()
    }
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// Axum handler forwarding everything to the listener's engine.
pub async fn proxy_handler(State(engine): State<Arc<ProxyEngine>>, request: Request) -> Response {
    engine.forward(request).await
}

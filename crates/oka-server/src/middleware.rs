//! Request middleware for proxied traffic.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use oka_core::{ClientIdentity, Pipeline};
use oka_telemetry::GeoLocator;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Run the admission pipeline before the request reaches the proxy.
///
/// Admitted requests carry their [`ClientIdentity`] as an extension so the
/// engine does not resolve it twice.
pub async fn admission_middleware(
    State(pipeline): State<Arc<Pipeline>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let client = ClientIdentity::from_parts(&parts);

    if let Some(response) = pipeline.run(&parts, &client).await {
        return response;
    }

    parts.extensions.insert(client);
    next.run(Request::from_parts(parts, body)).await
}

/// State for [`access_log_middleware`].
#[derive(Clone)]
pub struct AccessLog {
    server: Arc<str>,
    geo: Arc<dyn GeoLocator>,
}

impl AccessLog {
    /// Create access log state for a listener.
    pub fn new(server: &str, geo: Arc<dyn GeoLocator>) -> Self {
        Self {
            server: Arc::from(server),
            geo,
        }
    }
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLog")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

/// One `info` line per request.
pub async fn access_log_middleware(
    State(log): State<AccessLog>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = ClientIdentity::resolve(request.headers(), remote);

    let response = next.run(request).await;

    info!(
        server = %log.server,
        ip = %client,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        location = %log.geo.locate(client.as_str()),
        "Request handled"
    );

    response
}

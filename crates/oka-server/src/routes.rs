//! Router assembly for one listener.

use crate::middleware::{access_log_middleware, admission_middleware, AccessLog};
use axum::routing::get;
use axum::Router;
use oka_core::Pipeline;
use oka_proxy::{health_handler, proxy_handler, status_handler, ProxyEngine, StatusState};
use oka_security::SecurityHeadersLayer;
use oka_telemetry::GeoLocator;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

/// Everything a listener router is built from.
pub struct ListenerRoutes {
    /// Listener name
    pub server_name: String,
    /// Whether the listener terminates TLS
    pub tls: bool,
    /// Admission stages for proxied requests
    pub pipeline: Arc<Pipeline>,
    /// Upstream forwarding
    pub engine: Arc<ProxyEngine>,
    /// `/status` state
    pub status: Arc<StatusState>,
    /// Location lookup for access logs
    pub geo: Arc<dyn GeoLocator>,
}

/// Create the router for one listener.
///
/// `GET /health` and `GET /status` are answered locally. Every other request,
/// including other methods on those paths, passes the admission pipeline and
/// is forwarded upstream.
pub fn listener_router(routes: ListenerRoutes) -> Router {
    let proxied: Router = Router::new()
        .fallback(proxy_handler)
        .with_state(routes.engine)
        .layer(axum::middleware::from_fn_with_state(
            routes.pipeline,
            admission_middleware,
        ));

    Router::new()
        .route(
            "/health",
            get(health_handler).fallback_service(proxied.clone()),
        )
        .route(
            "/status",
            get(status_handler).fallback_service(proxied.clone()),
        )
        .fallback_service(proxied)
        .with_state(routes.status)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(axum::middleware::from_fn_with_state(
                    AccessLog::new(&routes.server_name, routes.geo),
                    access_log_middleware,
                ))
                .layer(SecurityHeadersLayer::new(routes.tls))
                .layer(CompressionLayer::new()),
        )
}

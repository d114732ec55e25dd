//! Response hardening headers added to every listener response.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};

const HSTS_VALUE: &str = "max-age=31536000; includeSubDomains";

const BASELINE: [(HeaderName, &str); 4] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
];

/// Set hardening headers on a proxied or locally generated response.
///
/// Upstream values are overwritten. `Strict-Transport-Security` is only
/// sent when the listener terminates TLS.
pub fn apply_security_headers(tls: bool, headers: &mut HeaderMap) {
    for (name, value) in BASELINE {
        headers.insert(name, HeaderValue::from_static(value));
    }
    if tls {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS_VALUE),
        );
    }
}

/// Layer wrapping a listener router with [`SecurityHeaders`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityHeadersLayer {
    tls: bool,
}

impl SecurityHeadersLayer {
    /// `tls` adds `Strict-Transport-Security`.
    #[must_use]
    pub const fn new(tls: bool) -> Self {
        Self { tls }
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeaders<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeaders { inner, tls: self.tls }
    }
}

/// Service produced by [`SecurityHeadersLayer`].
#[derive(Debug, Clone)]
pub struct SecurityHeaders<S> {
    inner: S,
    tls: bool,
}

impl<S, B, R> Service<Request<B>> for SecurityHeaders<S>
where
    S: Service<Request<B>, Response = Response<R>>,
    S::Future: Send + 'static,
{
    type Response = Response<R>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response<R>, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let tls = self.tls;
        let response = self.inner.call(request);
        Box::pin(async move {
            let mut response = response.await?;
            apply_security_headers(tls, response.headers_mut());
            Ok(response)
        })
    }
}

//! Header rewriting for forwarded requests and relayed responses.

use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue};
use oka_core::identity::{X_FORWARDED_FOR, X_REAL_IP};
use oka_core::ClientIdentity;

/// Protocol the client used to reach the proxy.
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
/// `Host` the client asked for.
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Marks responses relayed by this proxy.
pub const X_PROXY_BY: &str = "x-proxy-by";
/// Marks responses generated because the upstream failed.
pub const X_PROXY_ERROR: &str = "x-proxy-error";
/// Value of [`X_PROXY_BY`].
pub const PROXY_NAME: &str = "OkaProxy";

/// Headers that only apply to a single connection.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Headers for the upstream request.
///
/// `upstream_host` replaces `Host`; the original goes to `X-Forwarded-Host`.
pub fn outbound_headers(
    inbound: &HeaderMap,
    client: &ClientIdentity,
    upstream_host: &HeaderValue,
    tls: bool,
) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);

    let original_host = headers.remove(header::HOST);
    headers.insert(header::HOST, upstream_host.clone());

    let chain = inbound
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(
            || client.to_string(),
            |prior| format!("{prior}, {client}"),
        );
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
    if let Ok(value) = HeaderValue::from_str(client.as_str()) {
        headers.insert(X_REAL_IP, value);
    }

    headers.insert(
        X_FORWARDED_PROTO,
        HeaderValue::from_static(if tls { "https" } else { "http" }),
    );

    match original_host {
        Some(host) => {
            headers.insert(X_FORWARDED_HOST, host);
        }
        None => {
            headers.remove(X_FORWARDED_HOST);
        }
    }

    headers
}

/// Rewrite upstream response headers in place.
pub fn rewrite_response_headers(headers: &mut HeaderMap) {
    strip_hop_by_hop(headers);
    headers.remove(header::SERVER);
    headers.remove("x-powered-by");
    headers.insert(X_PROXY_BY, HeaderValue::from_static(PROXY_NAME));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
}

/// Whether the request asks to switch to the WebSocket protocol.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

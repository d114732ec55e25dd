//! Client identity resolution.
//!
//! A client is keyed by the first non-empty value of, in order:
//! `CF-Connecting-IP`, `X-Real-IP`, the first `X-Forwarded-For` entry, and
//! finally the socket peer address.

use axum::extract::ConnectInfo;
use http::request::Parts;
use http::HeaderMap;
use std::fmt;
use std::net::SocketAddr;

/// Header set by Cloudflare with the original client address.
pub const CF_CONNECTING_IP: &str = "cf-connecting-ip";
/// Header set by front proxies with the original client address.
pub const X_REAL_IP: &str = "x-real-ip";
/// Comma separated chain of client and proxy addresses.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Placeholder used when no source yields an address.
const UNKNOWN: &str = "unknown";

/// The resolved identity of the client behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Resolve the identity from request headers and the socket peer.
    #[must_use]
    pub fn resolve(headers: &HeaderMap, remote: Option<SocketAddr>) -> Self {
        if let Some(ip) = header_value(headers, CF_CONNECTING_IP) {
            return Self(ip.to_string());
        }
        if let Some(ip) = header_value(headers, X_REAL_IP) {
            return Self(ip.to_string());
        }
        if let Some(ip) = header_value(headers, X_FORWARDED_FOR)
            .and_then(|xff| xff.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return Self(ip.to_string());
        }

        remote.map_or_else(
            || Self(UNKNOWN.to_string()),
            |addr| Self(addr.ip().to_string()),
        )
    }

    /// Resolve the identity of a request from its head.
    #[must_use]
    pub fn from_parts(parts: &Parts) -> Self {
        Self::resolve(&parts.headers, peer_addr(parts))
    }

    /// Create an identity from a raw value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Socket peer of the connection carrying this request, when the server
/// was started with connect info.
#[must_use]
pub fn peer_addr(parts: &Parts) -> Option<SocketAddr> {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

//! Cookie challenge gate.
//!
//! Clients without a valid token pair get the challenge page plus freshly
//! minted cookies. A browser that stores them passes on the next request.
//! Anything malformed is treated as unverified, never as an error.

use crate::token::TokenCodec;
use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, SET_COOKIE};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, StatusCode};
use oka_core::{ClientIdentity, Stage, StageOutcome};
use std::time::Duration;
use tracing::debug;

/// Cookie carrying the hex token. Readable by page scripts.
pub const TOKEN_COOKIE: &str = "oka_validation_token";
/// Cookie carrying the decimal expiration in epoch milliseconds.
pub const EXPIRATION_COOKIE: &str = "oka_validation_expiration";

/// Why a client is being challenged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeReason {
    /// One or both cookies absent or empty.
    Missing,
    /// Expiration cookie is not an integer.
    Malformed,
    /// Expiration is in the past.
    Expired,
    /// Token does not match the expiration.
    InvalidToken,
}

impl ChallengeReason {
    /// Whether stale cookies must be cleared before re-issuing.
    #[must_use]
    pub const fn clears_cookies(self) -> bool {
        !matches!(self, Self::Missing)
    }

    /// Short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::Expired => "expired",
            Self::InvalidToken => "invalid_token",
        }
    }
}

/// Gate verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Valid token pair.
    Admit,
    /// Serve the challenge.
    Challenge(ChallengeReason),
}

/// Verification stage for one listener.
#[derive(Debug, Clone)]
pub struct VerificationGate {
    server: String,
    codec: TokenCodec,
    lifetime: Duration,
    page: Bytes,
}

impl VerificationGate {
    /// Create a gate.
    #[must_use]
    pub fn new(
        server: impl Into<String>,
        codec: TokenCodec,
        lifetime: Duration,
        page: impl Into<Bytes>,
    ) -> Self {
        Self {
            server: server.into(),
            codec,
            lifetime,
            page: page.into(),
        }
    }

    /// Decide on the cookies of a request at `now_ms`.
    #[must_use]
    pub fn decide(&self, jar: &CookieJar, now_ms: i64) -> GateDecision {
        let token = jar.get(TOKEN_COOKIE).map(Cookie::value).unwrap_or_default();
        let expiration = jar
            .get(EXPIRATION_COOKIE)
            .map(Cookie::value)
            .unwrap_or_default();

        if token.is_empty() || expiration.is_empty() {
            return GateDecision::Challenge(ChallengeReason::Missing);
        }

        let Ok(expiration_ms) = expiration.parse::<i64>() else {
            return GateDecision::Challenge(ChallengeReason::Malformed);
        };

        if now_ms > expiration_ms {
            return GateDecision::Challenge(ChallengeReason::Expired);
        }

        if !self.codec.verify(expiration, token) {
            return GateDecision::Challenge(ChallengeReason::InvalidToken);
        }

        GateDecision::Admit
    }

    /// Evaluate request headers at `now_ms`.
    pub fn evaluate_at(&self, headers: &HeaderMap, now_ms: i64) -> StageOutcome {
        let jar = CookieJar::from_headers(headers);
        match self.decide(&jar, now_ms) {
            GateDecision::Admit => StageOutcome::Continue,
            GateDecision::Challenge(reason) => {
                StageOutcome::Respond(self.challenge(now_ms, reason.clears_cookies()))
            }
        }
    }

    /// Build the challenge response with fresh cookies.
    ///
    /// With `clear_existing`, removal cookies are emitted first so user agents
    /// drop the stale pair before storing the new one.
    #[must_use]
    pub fn challenge(&self, now_ms: i64, clear_existing: bool) -> Response {
        let issued = self.codec.issue(now_ms, self.lifetime);
        let max_age = time::Duration::seconds(
            i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX),
        );

        let mut cookies = Vec::with_capacity(4);
        if clear_existing {
            cookies.push(token_cookie(String::new(), time::Duration::ZERO));
            cookies.push(expiration_cookie(String::new(), time::Duration::ZERO));
        }
        cookies.push(token_cookie(issued.token, max_age));
        cookies.push(expiration_cookie(issued.expiration_ms.to_string(), max_age));

        let mut response = (
            StatusCode::OK,
            [
                (CONTENT_TYPE, "text/html; charset=utf-8"),
                (CACHE_CONTROL, "no-store"),
            ],
            self.page.clone(),
        )
            .into_response();

        for cookie in cookies {
            if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
                response.headers_mut().append(SET_COOKIE, value);
            }
        }
        response
    }
}

fn token_cookie(value: String, max_age: time::Duration) -> Cookie<'static> {
    Cookie::build((TOKEN_COOKIE, value))
        .path("/")
        .max_age(max_age)
        .build()
}

fn expiration_cookie(value: String, max_age: time::Duration) -> Cookie<'static> {
    Cookie::build((EXPIRATION_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(true)
        .max_age(max_age)
        .build()
}

#[async_trait]
impl Stage for VerificationGate {
    fn name(&self) -> &'static str {
        "verification"
    }

    async fn evaluate(&self, request: &Parts, client: &ClientIdentity) -> StageOutcome {
        let outcome = self.evaluate_at(&request.headers, chrono::Utc::now().timestamp_millis());
        if let StageOutcome::Respond(_) = outcome {
            debug!(
                server = %self.server,
                client = %client,
                path = %request.uri.path(),
                "Issued verification challenge"
            );
        }
        outcome
    }
}

//! Stateless verification tokens.
//!
//! A token is the lowercase hex HMAC-SHA256 of the decimal expiration
//! timestamp (epoch milliseconds) under the listener's secret. The server keeps
//! no session state: validity is recomputed on every request.

use crate::error::{Result, SecurityError};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;

/// HMAC-SHA256 type.
type HmacSha256 = Hmac<Sha256>;

/// An expiration and the token proving it was issued by this proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationToken {
    /// Expiration in epoch milliseconds.
    pub expiration_ms: i64,
    /// Hex digest over the decimal expiration.
    pub token: String,
}

/// Mints and verifies tokens for one secret.
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
}

impl TokenCodec {
    /// Key a codec with the listener secret.
    ///
    /// # Errors
    /// Returns error if the key is rejected by the MAC.
    pub fn new(secret: &SecretString) -> Result<Self> {
        let mac = <HmacSha256 as Mac>::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| SecurityError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Token for an expiration timestamp.
    #[must_use]
    pub fn mint(&self, expiration_ms: i64) -> String {
        self.sign(&expiration_ms.to_string())
    }

    /// Whether `token` was minted for the expiration exactly as the client
    /// sent it. `0061000` and `61000` are different messages.
    ///
    /// Expiry is not checked here.
    #[must_use]
    pub fn verify(&self, expiration: &str, token: &str) -> bool {
        let expected = self.sign(expiration);
        constant_time_eq(expected.as_bytes(), token.as_bytes())
    }

    fn sign(&self, message: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Issue a token valid for `lifetime` from `now_ms`.
    #[must_use]
    pub fn issue(&self, now_ms: i64, lifetime: Duration) -> VerificationToken {
        let lifetime_ms = i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX);
        let expiration_ms = now_ms.saturating_add(lifetime_ms);
        VerificationToken {
            expiration_ms,
            token: self.mint(expiration_ms),
        }
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Constant-time comparison.
///
/// Differing lengths return immediately; equal lengths always scan every byte.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

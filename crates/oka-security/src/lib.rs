//! # OkaProxy Security
//!
//! - [`token`]: stateless HMAC verification tokens
//! - [`gate`]: the cookie challenge stage run first on every listener
//! - [`headers`]: response hardening headers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod gate;
pub mod headers;
pub mod token;

pub use error::{Result, SecurityError};
pub use gate::{ChallengeReason, GateDecision, VerificationGate, EXPIRATION_COOKIE, TOKEN_COOKIE};
pub use headers::{apply_security_headers, SecurityHeaders, SecurityHeadersLayer};
pub use token::{constant_time_eq, TokenCodec, VerificationToken};

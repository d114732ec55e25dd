//! Configuration and cookie fixtures.

use oka_config::ProxyConfig;
use oka_security::{TokenCodec, EXPIRATION_COOKIE, TOKEN_COOKIE};
use secrecy::SecretString;
use std::time::Duration;

/// Secret shared by every test listener.
pub const TEST_SECRET: &str = "integration-test-secret";

/// Token lifetime of test listeners, in seconds.
pub const TEST_LIFETIME_SECS: u64 = 3600;

/// Config with one listener named `site` on an ephemeral port.
pub fn proxy_config(target_url: &str) -> ProxyConfig {
    multi_config(target_url, &["site"])
}

/// Config with one listener per name, all pointing at `target_url`.
///
/// Ports are 0 so the OS picks them; the file validator would reject that,
/// so the TOML is deserialized directly.
pub fn multi_config(target_url: &str, names: &[&str]) -> ProxyConfig {
    let mut raw = String::from(
        r#"
[limit]
count = 100
window = 60

[shutdown]
grace_period = "2s"
"#,
    );

    for name in names {
        raw.push_str(&format!(
            r#"
[[server]]
name = "{name}"
port = 0
bind_address = "127.0.0.1"
target_url = "{target_url}"
secret_key = "{TEST_SECRET}"
expired = {TEST_LIFETIME_SECS}
"#
        ));
    }

    toml::from_str(&raw).expect("test config should deserialize")
}

/// Set the global limit.
pub fn with_limit(mut config: ProxyConfig, count: u64, window_secs: u64) -> ProxyConfig {
    config.limit.count = count;
    config.limit.window = window_secs;
    config
}

/// Set the shutdown grace period.
pub fn with_grace(mut config: ProxyConfig, grace: Duration) -> ProxyConfig {
    config.shutdown.grace_period = grace;
    config
}

/// `Cookie` header value carrying a token minted with [`TEST_SECRET`].
pub fn cookie_header(expiration_ms: i64) -> String {
    let codec = TokenCodec::new(&SecretString::new(TEST_SECRET.to_string()))
        .expect("test secret is a valid key");
    format!(
        "{TOKEN_COOKIE}={}; {EXPIRATION_COOKIE}={expiration_ms}",
        codec.mint(expiration_ms)
    )
}

/// A `Cookie` header valid for the next hour.
pub fn valid_cookie_header() -> String {
    cookie_header(chrono::Utc::now().timestamp_millis() + 3_600_000)
}

//! Verification challenge integration tests

use crate::fixtures::*;
use crate::helpers::*;
use oka_security::{EXPIRATION_COOKIE, TOKEN_COOKIE};
use oka_server::DEFAULT_CHALLENGE_PAGE;
use reqwest::header::SET_COOKIE;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn upstream() -> MockServer {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("protected content"))
        .mount(&upstream)
        .await;
    upstream
}

/// First visit gets the challenge page and a fresh cookie pair
#[tokio::test]
async fn test_first_visit_is_challenged() {
    let upstream = upstream().await;
    let proxy = TestProxy::start(proxy_config(&upstream.uri())).await;

    let response = proxy.get("/page").await;
    assert_status(&response, 200);

    let set_cookies: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(set_cookies.len(), 2);
    assert!(set_cookies[0].starts_with(&format!("{TOKEN_COOKIE}=")));
    assert!(set_cookies[0].contains(&format!("Max-Age={TEST_LIFETIME_SECS}")));
    assert!(set_cookies[1].starts_with(&format!("{EXPIRATION_COOKIE}=")));
    assert!(set_cookies[1].contains("HttpOnly"));
    assert!(set_cookies[1].contains("Secure"));

    assert_eq!(response.text().await.unwrap(), DEFAULT_CHALLENGE_PAGE);
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

/// Replaying the issued cookies reaches the upstream
#[tokio::test]
async fn test_issued_cookies_pass_the_gate() {
    let upstream = upstream().await;
    let proxy = TestProxy::start(proxy_config(&upstream.uri())).await;

    let challenge = proxy.get("/page").await;
    let cookie = cookies_from(challenge.headers());

    let response = proxy.get_with_cookie("/page", &cookie).await;
    assert_status(&response, 200);
    assert!(response.headers().get(SET_COOKIE).is_none());
    assert_eq!(response.text().await.unwrap(), "protected content");
}

/// Forged tokens are re-challenged and the stale pair is cleared first
#[tokio::test]
async fn test_forged_token_is_rechallenged() {
    let upstream = upstream().await;
    let proxy = TestProxy::start(proxy_config(&upstream.uri())).await;

    let expiration = chrono::Utc::now().timestamp_millis() + 60_000;
    let forged = format!("{TOKEN_COOKIE}=deadbeef; {EXPIRATION_COOKIE}={expiration}");

    let response = proxy.get_with_cookie("/page", &forged).await;
    assert_status(&response, 200);

    let set_cookies: Vec<&str> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(set_cookies.len(), 4);
    assert!(set_cookies[0].contains("Max-Age=0"));
    assert!(set_cookies[1].contains("Max-Age=0"));
    assert!(!set_cookies[2].contains("Max-Age=0"));
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

/// A correctly signed but expired pair is re-challenged
#[tokio::test]
async fn test_expired_token_is_rechallenged() {
    let upstream = upstream().await;
    let proxy = TestProxy::start(proxy_config(&upstream.uri())).await;

    let expired = cookie_header(chrono::Utc::now().timestamp_millis() - 1_000);
    let response = proxy.get_with_cookie("/page", &expired).await;

    assert_status(&response, 200);
    assert_eq!(response.text().await.unwrap(), DEFAULT_CHALLENGE_PAGE);
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

/// Tokens are bound to the listener secret
#[tokio::test]
async fn test_token_from_other_secret_is_rejected() {
    let upstream = upstream().await;
    let mut config = proxy_config(&upstream.uri());
    config.servers[0].secret_key = secrecy::SecretString::new("a-different-secret".to_string());
    let proxy = TestProxy::start(config).await;

    let response = proxy.get_with_cookie("/page", &valid_cookie_header()).await;
    assert_eq!(response.text().await.unwrap(), DEFAULT_CHALLENGE_PAGE);
}

/// Health checks never need verification
#[tokio::test]
async fn test_health_skips_verification() {
    let upstream = upstream().await;
    let proxy = TestProxy::start(proxy_config(&upstream.uri())).await;

    let response = proxy.get("/health").await;
    assert_status(&response, 200);
    assert!(response.headers().get(SET_COOKIE).is_none());

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

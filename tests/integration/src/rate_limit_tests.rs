//! Rate limiting integration tests

use crate::fixtures::*;
use crate::helpers::*;
use oka_config::LimitScope;
use oka_resilience::RATE_LIMIT_MESSAGE;
use std::sync::Arc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn upstream() -> MockServer {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&upstream)
        .await;
    upstream
}

/// The Nth request passes and the N+1th is rejected
#[tokio::test]
async fn test_limit_threshold() {
    let upstream = upstream().await;
    let proxy = TestProxy::start(with_limit(proxy_config(&upstream.uri()), 3, 60)).await;
    let cookie = valid_cookie_header();

    for _ in 0..3 {
        let response = proxy.get_with_cookie("/", &cookie).await;
        assert_status(&response, 200);
    }

    let response = proxy.get_with_cookie("/", &cookie).await;
    assert_status(&response, 429);
    assert_eq!(response.headers().get("retry-after").unwrap(), "60");

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], RATE_LIMIT_MESSAGE);
    assert_eq!(upstream.received_requests().await.unwrap().len(), 3);
}

/// Challenged requests never reach the limiter
#[tokio::test]
async fn test_challenges_are_not_counted() {
    let upstream = upstream().await;
    let proxy = TestProxy::start(with_limit(proxy_config(&upstream.uri()), 2, 60)).await;

    for _ in 0..5 {
        let response = proxy.get("/").await;
        assert_status(&response, 200);
    }

    let response = proxy.get_with_cookie("/", &valid_cookie_header()).await;
    assert_status(&response, 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

/// Clients are counted separately
#[tokio::test]
async fn test_clients_have_separate_counters() {
    let upstream = upstream().await;
    let proxy = TestProxy::start(with_limit(proxy_config(&upstream.uri()), 1, 60)).await;
    let cookie = valid_cookie_header();

    for client in ["198.51.100.1", "198.51.100.2"] {
        let response = proxy
            .client
            .get(proxy.url("site", "/"))
            .header("cookie", &cookie)
            .header("x-real-ip", client)
            .send()
            .await
            .unwrap();
        assert_status(&response, 200);
    }
}

/// A failing store admits every request
#[tokio::test]
async fn test_store_failure_fails_open() {
    let upstream = upstream().await;
    let proxy = TestProxy::start_with_store(
        with_limit(proxy_config(&upstream.uri()), 1, 60),
        Arc::new(FailingStore),
    )
    .await;
    let cookie = valid_cookie_header();

    for _ in 0..5 {
        let response = proxy.get_with_cookie("/", &cookie).await;
        assert_status(&response, 200);
    }
}

/// Zero count disables limiting
#[tokio::test]
async fn test_zero_count_disables_limiting() {
    let upstream = upstream().await;
    let proxy = TestProxy::start(with_limit(proxy_config(&upstream.uri()), 0, 60)).await;
    let cookie = valid_cookie_header();

    for _ in 0..10 {
        let response = proxy.get_with_cookie("/", &cookie).await;
        assert_status(&response, 200);
    }
}

/// Global scope shares a client's counter between listeners
#[tokio::test]
async fn test_global_scope_is_shared_across_listeners() {
    let upstream = upstream().await;
    let config = with_limit(multi_config(&upstream.uri(), &["a", "b"]), 2, 60);
    let proxy = TestProxy::start(config).await;
    let cookie = valid_cookie_header();

    assert_status(&proxy.get_from("a", "/", &cookie).await, 200);
    assert_status(&proxy.get_from("a", "/", &cookie).await, 200);
    assert_status(&proxy.get_from("b", "/", &cookie).await, 429);
}

/// Per-listener scope keeps counters apart
#[tokio::test]
async fn test_per_listener_scope() {
    let upstream = upstream().await;
    let mut config = with_limit(multi_config(&upstream.uri(), &["a", "b"]), 2, 60);
    config.limit.scope = LimitScope::PerListener;
    let proxy = TestProxy::start(config).await;
    let cookie = valid_cookie_header();

    assert_status(&proxy.get_from("a", "/", &cookie).await, 200);
    assert_status(&proxy.get_from("a", "/", &cookie).await, 200);
    assert_status(&proxy.get_from("a", "/", &cookie).await, 429);
    assert_status(&proxy.get_from("b", "/", &cookie).await, 200);
}

/// A listener override replaces the global ceiling
#[tokio::test]
async fn test_listener_override() {
    let upstream = upstream().await;
    let mut config = with_limit(proxy_config(&upstream.uri()), 100, 60);
    config.servers[0].limit = Some(oka_config::LimitOverride {
        count: Some(1),
        window: None,
    });
    let proxy = TestProxy::start(config).await;
    let cookie = valid_cookie_header();

    assert_status(&proxy.get_with_cookie("/", &cookie).await, 200);
    assert_status(&proxy.get_with_cookie("/", &cookie).await, 429);
}

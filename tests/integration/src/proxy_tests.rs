//! Forwarding integration tests

use crate::fixtures::*;
use crate::helpers::*;
use oka_proxy::DEFAULT_GATEWAY_ERROR_PAGE;
use pretty_assertions::assert_eq;
use reqwest::Method;
use wiremock::matchers::{body_string, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Upstream sees forwarding headers; client sees hardened response headers
#[tokio::test]
async fn test_forwarding_header_contract() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("server", "nginx/1.25")
                .insert_header("x-powered-by", "Express")
                .set_body_string("[]"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let proxy = TestProxy::start(proxy_config(&upstream.uri())).await;
    let proxy_addr = proxy.addr("site");
    let response = proxy
        .get_with_cookie("/api/items?page=2", &valid_cookie_header())
        .await;

    assert_status(&response, 200);
    let headers = response.headers();
    assert!(headers.get("server").is_none());
    assert!(headers.get("x-powered-by").is_none());
    assert_eq!(headers.get("x-proxy-by").unwrap(), "OkaProxy");
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("x-request-id").is_some());

    let received = upstream.received_requests().await.unwrap();
    let request = &received[0];
    let upstream_authority = upstream.uri().trim_start_matches("http://").to_string();
    let header = |name: &str| request.headers.get(name).unwrap().to_str().unwrap().to_string();

    assert_eq!(request.url.query(), Some("page=2"));
    assert_eq!(header("host"), upstream_authority);
    assert_eq!(header("x-forwarded-for"), "127.0.0.1");
    assert_eq!(header("x-real-ip"), "127.0.0.1");
    assert_eq!(header("x-forwarded-proto"), "http");
    assert_eq!(header("x-forwarded-host"), proxy_addr.to_string());
}

/// An existing forwarding chain is extended
#[tokio::test]
async fn test_forwarded_for_chain_is_extended() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&upstream)
        .await;

    let proxy = TestProxy::start(proxy_config(&upstream.uri())).await;
    let response = proxy
        .client
        .get(proxy.url("site", "/"))
        .header("cookie", valid_cookie_header())
        .header("x-forwarded-for", "203.0.113.5, 10.0.0.2")
        .send()
        .await
        .unwrap();
    assert_status(&response, 204);

    let received = upstream.received_requests().await.unwrap();
    assert_eq!(
        received[0].headers.get("x-forwarded-for").unwrap(),
        "203.0.113.5, 10.0.0.2, 203.0.113.5"
    );
}

/// Request bodies reach the upstream unchanged
#[tokio::test]
async fn test_request_body_is_forwarded() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .and(body_string("name=oka&items=3"))
        .respond_with(ResponseTemplate::new(201).set_body_string("created"))
        .expect(1)
        .mount(&upstream)
        .await;

    let proxy = TestProxy::start(proxy_config(&upstream.uri())).await;
    let response = proxy
        .client
        .post(proxy.url("site", "/submit"))
        .header("cookie", valid_cookie_header())
        .body("name=oka&items=3")
        .send()
        .await
        .unwrap();

    assert_status(&response, 201);
    assert_eq!(response.text().await.unwrap(), "created");
}

/// Every method gets the 502 page when the upstream is down
#[tokio::test]
async fn test_unreachable_upstream_returns_gateway_error() {
    let target = format!("http://127.0.0.1:{}", unused_port());
    let proxy = TestProxy::start(proxy_config(&target)).await;
    let cookie = valid_cookie_header();

    for method in [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
    ] {
        let response = proxy
            .client
            .request(method.clone(), proxy.url("site", "/anything"))
            .header("cookie", &cookie)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 502, "method {method}");
        assert_eq!(response.headers().get("x-proxy-error").unwrap(), "true");
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        assert_eq!(response.text().await.unwrap(), DEFAULT_GATEWAY_ERROR_PAGE);
    }
}

/// WebSocket upgrades are answered with 501
#[tokio::test]
async fn test_websocket_upgrade_is_not_implemented() {
    let upstream = MockServer::start().await;
    let proxy = TestProxy::start(proxy_config(&upstream.uri())).await;

    let response = proxy
        .client
        .get(proxy.url("site", "/ws"))
        .header("cookie", valid_cookie_header())
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .send()
        .await
        .unwrap();

    assert_status(&response, 501);
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

/// `/status` probes the upstream
#[tokio::test]
async fn test_status_reports_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let proxy = TestProxy::start(proxy_config(&upstream.uri())).await;
    let body: serde_json::Value = proxy.get("/status").await.json().await.unwrap();

    assert_eq!(body["server_name"], "site");
    assert_eq!(body["target_url"], upstream.uri());
    assert_eq!(body["target_status"], "reachable (status: 200)");
}

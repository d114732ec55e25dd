//! Startup and graceful shutdown integration tests

use crate::fixtures::*;
use crate::helpers::*;
use oka_server::ListenerPhase;
use std::time::{Duration, Instant};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn slow_upstream(delay: Duration) -> MockServer {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(delay),
        )
        .mount(&upstream)
        .await;
    upstream
}

/// Every configured listener serves
#[tokio::test]
async fn test_all_listeners_serve() {
    let upstream = slow_upstream(Duration::ZERO).await;
    let proxy = TestProxy::start(multi_config(&upstream.uri(), &["a", "b", "c"])).await;

    assert_eq!(proxy.manager().listeners().len(), 3);
    for name in ["a", "b", "c"] {
        let response = proxy
            .client
            .get(proxy.url(name, "/health"))
            .send()
            .await
            .unwrap();
        assert_status(&response, 200);
    }
}

/// A request in flight when shutdown starts still completes
#[tokio::test]
async fn test_in_flight_request_completes() {
    let upstream = slow_upstream(Duration::from_millis(800)).await;
    let mut proxy = TestProxy::start(proxy_config(&upstream.uri())).await;

    let request = proxy
        .client
        .get(proxy.url("site", "/slow"))
        .header("cookie", valid_cookie_header())
        .send();
    let in_flight = tokio::spawn(request);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let controls = proxy.manager().listeners().to_vec();
    let report = proxy.shutdown().await;

    let response = in_flight.await.unwrap().unwrap();
    assert_status(&response, 200);
    assert_eq!(response.text().await.unwrap(), "slow");

    assert_eq!(report.stopped, 1);
    assert!(!report.forced());
    assert_eq!(controls[0].phase(), ListenerPhase::Stopped);
}

/// Shutdown never waits past the grace period
#[tokio::test]
async fn test_shutdown_respects_deadline() {
    let upstream = slow_upstream(Duration::from_secs(30)).await;
    let config = with_grace(proxy_config(&upstream.uri()), Duration::from_millis(500));
    let mut proxy = TestProxy::start(config).await;

    let request = proxy
        .client
        .get(proxy.url("site", "/stuck"))
        .header("cookie", valid_cookie_header())
        .send();
    let in_flight = tokio::spawn(request);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    proxy.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(3));

    in_flight.abort();
}

/// Nothing accepts connections after shutdown
#[tokio::test]
async fn test_listener_closed_after_shutdown() {
    let upstream = slow_upstream(Duration::ZERO).await;
    let mut proxy = TestProxy::start(proxy_config(&upstream.uri())).await;
    let addr = proxy.addr("site");

    proxy.shutdown().await;

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}

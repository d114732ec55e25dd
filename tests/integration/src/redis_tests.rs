//! Redis counter store tests
//!
//! These need a running Redis: `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`

use crate::fixtures::*;
use crate::helpers::*;
use futures::future::join_all;
use oka_resilience::{CounterStore, RedisCounterStore};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn redis_store() -> Arc<RedisCounterStore> {
    Arc::new(
        RedisCounterStore::new(&redis_url(), Duration::from_secs(1), Duration::from_secs(2))
            .expect("valid Redis URL"),
    )
}

fn unique_key(prefix: &str) -> String {
    format!(
        "{prefix}:{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

/// Concurrent increments on a fresh key see every value exactly once
#[tokio::test]
#[ignore = "requires Redis, set REDIS_URL"]
async fn test_concurrent_increments_are_atomic() {
    let store = redis_store();
    let key = unique_key("okaproxy-test");

    let counts = join_all((0..50).map(|_| {
        let store = Arc::clone(&store);
        let key = key.clone();
        async move {
            store
                .increment(&key, Duration::from_secs(30))
                .await
                .unwrap()
        }
    }))
    .await;

    let mut sorted = counts.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=50).collect::<Vec<u64>>());
    assert_eq!(counts.iter().filter(|&&c| c == 1).count(), 1);

    let client = redis::Client::open(redis_url()).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let ttl: i64 = redis::cmd("TTL").arg(&key).query_async(&mut conn).await.unwrap();
    assert!(ttl > 0 && ttl <= 30, "ttl was {ttl}");

    let _: () = redis::cmd("DEL").arg(&key).query_async(&mut conn).await.unwrap();
    store.close().await;
}

/// The proxy limits through Redis end to end
#[tokio::test]
#[ignore = "requires Redis, set REDIS_URL"]
async fn test_proxy_limits_through_redis() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let mut config = with_limit(proxy_config(&upstream.uri()), 2, 60);
    config.limit.key_prefix = unique_key("okaproxy-it");
    let mut proxy = TestProxy::start_with_store(config, redis_store()).await;
    let cookie = valid_cookie_header();

    assert_status(&proxy.get_with_cookie("/", &cookie).await, 200);
    assert_status(&proxy.get_with_cookie("/", &cookie).await, 200);
    assert_status(&proxy.get_with_cookie("/", &cookie).await, 429);

    proxy.shutdown().await;
}

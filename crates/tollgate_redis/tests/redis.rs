// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tests against a live Redis server.
//!
//! Run with `TOLLGATE_REDIS_URL=redis://127.0.0.1:6379 cargo test -p tollgate_redis -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tollgate::{
    AttemptContext, CallExecutor, CallRequest, CircuitState, ErrorKind, Governor, GovernorConfig, SharedCoordinator,
    TransportError, VendorResponse, WindowDecision, WindowRequest,
};
use tollgate_redis::RedisCoordinator;

async fn coordinator() -> RedisCoordinator {
    let url = std::env::var("TOLLGATE_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisCoordinator::connect(&url).await.unwrap()
}

fn unique(name: &str) -> String {
    format!("tollgate-test:{name}:{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn compare_and_swap() {
    let store = coordinator().await;
    let key = unique("cas");
    let ttl = Duration::from_secs(30);

    assert!(store.compare_and_swap(&key, None, "a", ttl).await.unwrap());
    assert!(!store.compare_and_swap(&key, None, "b", ttl).await.unwrap());
    assert!(!store.compare_and_swap(&key, Some("x"), "b", ttl).await.unwrap());
    assert!(store.compare_and_swap(&key, Some("a"), "b", ttl).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("b"));

    store.delete(&key).await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn increment_counts() {
    let store = coordinator().await;
    let key = unique("counter");

    assert_eq!(store.increment(&key, Duration::from_secs(30)).await.unwrap(), 1);
    assert_eq!(store.increment(&key, Duration::from_secs(30)).await.unwrap(), 2);

    store.delete(&key).await.unwrap();
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn sliding_window() {
    let store = coordinator().await;
    let key = unique("window");
    let request = |member, now_millis| WindowRequest {
        member,
        limit: 2,
        window: Duration::from_secs(1),
        now_millis,
    };

    assert_eq!(store.sliding_window_acquire(&key, request("a", 10_000)).await.unwrap(), WindowDecision::Acquired);
    assert_eq!(store.sliding_window_acquire(&key, request("b", 10_400)).await.unwrap(), WindowDecision::Acquired);
    assert_eq!(
        store.sliding_window_acquire(&key, request("c", 10_500)).await.unwrap(),
        WindowDecision::Full {
            retry_after: Duration::from_millis(500)
        }
    );

    store.sliding_window_release(&key, "b").await.unwrap();
    assert_eq!(store.sliding_window_acquire(&key, request("c", 10_500)).await.unwrap(), WindowDecision::Acquired);

    // "a" leaves the window at 11_000
    assert_eq!(store.sliding_window_acquire(&key, request("d", 11_000)).await.unwrap(), WindowDecision::Acquired);

    store.delete(&key).await.unwrap();
}

struct Failing;

impl CallExecutor for Failing {
    async fn execute(&self, _: &CallRequest, _: &AttemptContext) -> Result<VendorResponse, TransportError> {
        Ok(VendorResponse::new(StatusCode::SERVICE_UNAVAILABLE, ""))
    }
}

#[tokio::test]
#[ignore = "needs a Redis server"]
async fn breaker_is_shared_between_governors() {
    let store = Arc::new(coordinator().await);

    let mut config = GovernorConfig::new(unique("vendor"));
    config.max_attempts = 1;
    config.breaker.failure_threshold = 2;

    let first = Governor::builder(Failing, Arc::clone(&store)).config(config.clone()).build().unwrap();
    let second = Governor::builder(Failing, Arc::clone(&store)).config(config).build().unwrap();

    for _ in 0..2 {
        let error = first.call(CallRequest::new("ping")).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::VendorServerError);
    }

    let error = second.call(CallRequest::new("ping")).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::CircuitOpen);
    assert_eq!(second.breaker().state().await.unwrap(), CircuitState::Open);

    first.breaker().reset().await.unwrap();
    assert_eq!(second.breaker().state().await.unwrap(), CircuitState::Closed);
}

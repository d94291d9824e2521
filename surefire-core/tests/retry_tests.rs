//! Tests for retry policy, round-robin failover and backoff timing

mod common;

use common::{client_with, fast_config, MockTransport, Reply};
use std::sync::Arc;
use std::time::Duration;
use surefire_core::capabilities::{ModelEntry, ProviderEntry, StaticTable};
use surefire_core::providers::{AttemptOutcome, ErrorClass, ErrorMapper, ProviderError};
use surefire_core::{ClientConfig, Error, GenerateOptions, Message, RetryPolicy};
use test_case::test_case;
use tokio::time::Instant;

fn two_provider_table() -> StaticTable {
    StaticTable::empty().with_model(
        ModelEntry::new("m")
            .provider(ProviderEntry::new("a").stable())
            .provider(ProviderEntry::new("b").stable()),
    )
}

#[test]
fn test_retry_policy_configurations() {
    let default_policy = RetryPolicy::default();
    assert_eq!(default_policy.max_attempts, 3);
    assert_eq!(default_policy.initial_delay, Duration::from_secs(2));
    assert_eq!(default_policy.backoff_factor, 2.0);
    assert!(default_policy.respect_retry_after);

    let no_retry = RetryPolicy::no_retry();
    assert_eq!(no_retry.max_attempts, 1);

    let immediate = RetryPolicy::immediate(4);
    assert_eq!(immediate.max_attempts, 4);
    assert_eq!(immediate.initial_delay, Duration::ZERO);
}

#[test]
fn test_exponential_backoff_without_jitter() {
    let policy = RetryPolicy::new(6)
        .with_initial_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_millis(1000));
    let error = ProviderError::network("p", "reset");

    assert_eq!(policy.calculate_delay(1, &error).as_millis(), 100);
    assert_eq!(policy.calculate_delay(2, &error).as_millis(), 200);
    assert_eq!(policy.calculate_delay(3, &error).as_millis(), 400);
    assert_eq!(policy.calculate_delay(4, &error).as_millis(), 800);
    assert_eq!(policy.calculate_delay(5, &error).as_millis(), 1000); // Capped at max
}

#[test]
fn test_backoff_factor_one_is_constant() {
    let policy = RetryPolicy::new(4)
        .with_initial_delay(Duration::from_millis(250))
        .with_backoff_factor(1.0);
    let error = ProviderError::network("p", "reset");
    for attempt in 1..=4 {
        assert_eq!(policy.calculate_delay(attempt, &error), Duration::from_millis(250));
    }
}

#[test_case(429, ErrorClass::RateLimited ; "rate limited")]
#[test_case(500, ErrorClass::Provider ; "server error")]
#[test_case(503, ErrorClass::Provider ; "unavailable")]
#[test_case(504, ErrorClass::Transient ; "gateway timeout")]
#[test_case(401, ErrorClass::Fatal ; "unauthorized")]
#[test_case(400, ErrorClass::Fatal ; "bad request")]
fn test_status_classification(status: u16, expected: ErrorClass) {
    let err = ErrorMapper::from_status_code("p", status, Some("oops"), None);
    assert_eq!(err.class(), expected);
    assert_eq!(err.is_retryable(), expected != ErrorClass::Fatal);
}

#[tokio::test]
async fn test_attempts_wrap_around_candidates() {
    let transport = MockTransport::new();
    let config = ClientConfig {
        retries: 5,
        ..fast_config()
    };
    let client = client_with(config, two_provider_table(), Arc::clone(&transport));

    let err = client.complete(vec![Message::user("hi")], "m").await.unwrap_err();

    assert_eq!(transport.providers_called(), vec!["a", "b", "a", "b", "a"]);
    match err {
        Error::Api(api) => {
            assert_eq!(api.attempts.len(), 5);
            assert!(api
                .attempts
                .iter()
                .all(|a| matches!(a.outcome, AttemptOutcome::Failed(ProviderError::Network { .. }))));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_single_candidate_is_retried() {
    let transport = MockTransport::new();
    transport
        .then("a", Reply::Fail(ProviderError::network("a", "reset")))
        .then("a", Reply::text("second time lucky"));
    let table = StaticTable::empty().with_model(ModelEntry::new("m").provider(ProviderEntry::new("a")));
    let client = client_with(fast_config(), table, Arc::clone(&transport));

    let text = client.complete(vec![Message::user("hi")], "m").await.unwrap();

    assert_eq!(text, "second time lucky");
    assert_eq!(transport.providers_called(), vec!["a", "a"]);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_waits_between_attempts() {
    let transport = MockTransport::new();
    let config = ClientConfig {
        retries: 3,
        retry_delay: 1.0,
        retry_backoff_factor: 2.0,
        ..fast_config()
    };
    let client = client_with(config, two_provider_table(), Arc::clone(&transport));

    let started = Instant::now();
    let _ = client.complete(vec![Message::user("hi")], "m").await;

    // 1s after the first failure, 2s after the second
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_max_retry_delay_caps_wait() {
    let transport = MockTransport::new();
    let config = ClientConfig {
        retries: 3,
        retry_delay: 5.0,
        retry_backoff_factor: 10.0,
        max_retry_delay: Some(6.0),
        ..fast_config()
    };
    let client = client_with(config, two_provider_table(), Arc::clone(&transport));

    let started = Instant::now();
    let _ = client.complete(vec![Message::user("hi")], "m").await;

    assert_eq!(started.elapsed(), Duration::from_secs(11));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_hint_is_honoured() {
    let transport = MockTransport::new();
    transport
        .then(
            "a",
            Reply::Fail(ProviderError::RateLimit {
                provider: "a".to_string(),
                retry_after: Some(Duration::from_millis(1500)),
            }),
        )
        .always("b", Reply::text("ok"));
    let config = ClientConfig {
        retry_delay: 30.0,
        ..fast_config()
    };
    let client = client_with(config, two_provider_table(), Arc::clone(&transport));

    let started = Instant::now();
    let text = client.complete(vec![Message::user("hi")], "m").await.unwrap();

    assert_eq!(text, "ok");
    assert_eq!(started.elapsed(), Duration::from_millis(1500));
}

#[tokio::test]
async fn test_failing_provider_drops_in_ordering() {
    let transport = MockTransport::new();
    transport
        .then("a", Reply::Fail(ProviderError::network("a", "reset")))
        .always("b", Reply::text("from b"));
    let client = client_with(fast_config(), two_provider_table(), Arc::clone(&transport));
    let mut chat = client.new_chat();

    chat.generate("one", GenerateOptions::new()).await.unwrap();
    chat.generate("two", GenerateOptions::new()).await.unwrap();

    // The second turn starts with the healthy provider.
    assert_eq!(transport.providers_called(), vec!["a", "b", "b"]);
}

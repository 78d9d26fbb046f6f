//! Scenario: four consecutive 500s against a source trip its circuit
//! breaker before the fourth lands on the wire; a probe after the reset
//! timeout succeeds and closes it again.
//!
//! Drives the full `HttpClient::execute` path (not the bare
//! `CircuitBreaker`) so the breaker's own state-machine coverage in
//! `src/resilience/circuit_breaker.rs` is exercised end to end through a
//! source's actual resilience policy.

use std::sync::Arc;
use std::time::Duration;

use httpmock::Method::GET;
use httpmock::MockServer;
use reqon::http::auth::NoAuth;
use reqon::http::client::{HttpClient, HttpClientError, HttpRequest};
use reqon::program::{BackoffKind, CircuitBreakerConfig, HttpMethod, RateLimitPolicyConfig, RateLimitStrategy, RetryPolicy};
use reqon::resilience::{CircuitBreaker, CircuitBreakerError, RateLimiter};
use tokio_util::sync::CancellationToken;

fn breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout_ms: 50,
        success_threshold: 1,
        rolling_window_ms: 60_000,
        failure_status_codes: (500..=599).collect(),
    }
}

fn single_attempt() -> RetryPolicy {
    RetryPolicy { max_attempts: 1, backoff: BackoffKind::Constant, initial_delay_ms: 0, max_delay_ms: 0 }
}

#[tokio::test(start_paused = true)]
async fn fourth_failing_call_is_rejected_before_the_fifth_probe_succeeds() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/flaky");
            then.status(500).json_body(serde_json::json!({ "error": "boom" }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/ok");
            then.status(200).json_body(serde_json::json!({ "status": "recovered" }));
        })
        .await;

    let client = HttpClient::new(
        "api",
        server.base_url(),
        reqwest::Client::new(),
        Arc::new(NoAuth),
        Arc::new(RateLimiter::new(None)),
        Arc::new(CircuitBreaker::new(None)),
        RateLimitPolicyConfig { strategy: RateLimitStrategy::Pause, ..Default::default() },
        breaker_config(),
    );
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        let mut request = HttpRequest::new(HttpMethod::Get, "/flaky");
        request.retry = Some(single_attempt());
        let err = client.execute(request, &cancel).await.expect_err("500 should fail");
        assert!(matches!(err, HttpClientError::Http { status: 500, .. }));
    }

    // Circuit is open: the fourth call never reaches the network, it's
    // rejected by the breaker check itself.
    let mut request = HttpRequest::new(HttpMethod::Get, "/flaky");
    request.retry = Some(single_attempt());
    let err = client.execute(request, &cancel).await.expect_err("circuit should be open");
    assert!(matches!(err, HttpClientError::CircuitOpen(CircuitBreakerError::Open { .. })));

    // Still within the reset timeout.
    tokio::time::advance(Duration::from_millis(25)).await;
    let mut request = HttpRequest::new(HttpMethod::Get, "/flaky");
    request.retry = Some(single_attempt());
    let err = client.execute(request, &cancel).await.expect_err("still open at 25ms");
    assert!(matches!(err, HttpClientError::CircuitOpen(CircuitBreakerError::Open { .. })));

    // Past the reset timeout: a probe request against a healthy endpoint
    // (same source, so the same resilience key) succeeds and closes it.
    tokio::time::advance(Duration::from_millis(30)).await;
    let mut probe = HttpRequest::new(HttpMethod::Get, "/ok");
    probe.retry = Some(single_attempt());
    let response = client.execute(probe, &cancel).await.expect("probe should succeed and close the circuit");
    assert_eq!(response.status, 200);

    // Circuit closed again: a follow-up failing call starts counting from
    // zero rather than immediately reopening.
    let mut request = HttpRequest::new(HttpMethod::Get, "/flaky");
    request.retry = Some(single_attempt());
    let err = client.execute(request, &cancel).await.expect_err("500 should fail");
    assert!(matches!(err, HttpClientError::Http { status: 500, .. }));
}

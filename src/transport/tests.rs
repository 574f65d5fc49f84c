//! Tests for the transport module

use super::*;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::pagination::{AsyncPageFetcher, PageRequest, PaginationLimits};
use crate::types::BackoffType;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn envelope_body(count: usize, start: u64) -> serde_json::Value {
    serde_json::json!({
        "items": (0..count).map(|i| serde_json::json!({ "id": start + i as u64 })).collect::<Vec<_>>(),
        "start": start,
        "end": count,
    })
}

fn test_config(base_url: String) -> ClientConfig {
    ClientConfig::builder()
        .base_url(base_url)
        .backoff(
            BackoffType::Constant,
            Duration::from_millis(5),
            Duration::from_millis(50),
        )
        .tls_settle_delay(Duration::from_millis(1))
        .no_rate_limit()
        .build()
}

// ============================================================================
// Governor: degradation
// ============================================================================

#[test]
fn test_degradation_halves_capacity_at_threshold() {
    // Defaults: capacity 30, threshold 5, floor 5.
    let governor = ConcurrencyGovernor::new(GovernorConfig::default());

    for _ in 0..4 {
        governor.record_tls_error();
    }
    assert_eq!(governor.capacity(), 30);
    assert_eq!(governor.snapshot().error_count, 4);

    governor.record_tls_error();
    assert_eq!(governor.capacity(), 15);
    assert_eq!(governor.snapshot().error_count, 0);

    // The next error counts from zero again.
    governor.record_tls_error();
    assert_eq!(governor.snapshot().error_count, 1);
    assert_eq!(governor.capacity(), 15);
}

#[test]
fn test_degradation_clamps_to_floor() {
    let governor = ConcurrencyGovernor::new(
        GovernorConfig::default()
            .with_max_concurrent_requests(8)
            .with_ssl_error_threshold(2),
    );

    governor.record_tls_error();
    governor.record_tls_error();
    assert_eq!(governor.capacity(), 5);

    // At the floor the ceiling no longer degrades.
    governor.record_tls_error();
    governor.record_tls_error();
    assert_eq!(governor.capacity(), 5);
}

#[test]
fn test_degradation_disabled_without_adaptive() {
    let governor = ConcurrencyGovernor::new(GovernorConfig::default().with_adaptive(false));

    for _ in 0..10 {
        governor.record_tls_error();
    }
    assert_eq!(governor.capacity(), 30);
}

#[test]
fn test_capacity_clamped_at_construction() {
    let governor =
        ConcurrencyGovernor::new(GovernorConfig::default().with_max_concurrent_requests(500));
    assert_eq!(governor.capacity(), HARD_CEILING);

    let governor =
        ConcurrencyGovernor::new(GovernorConfig::default().with_max_concurrent_requests(0));
    assert_eq!(governor.capacity(), 1);
}

// ============================================================================
// Governor: recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_recovery_grows_toward_high_water_mark() {
    let governor = ConcurrencyGovernor::new(GovernorConfig::default());
    for _ in 0..5 {
        governor.record_tls_error();
    }
    assert_eq!(governor.capacity(), 15);

    tokio::time::advance(Duration::from_secs(301)).await;
    governor.run_recovery_check();
    assert_eq!(governor.capacity(), 22); // 15 + max(1, 15/2)

    tokio::time::advance(Duration::from_secs(301)).await;
    governor.run_recovery_check();
    assert_eq!(governor.capacity(), 30); // capped at the high-water mark

    tokio::time::advance(Duration::from_secs(301)).await;
    governor.run_recovery_check();
    assert_eq!(governor.capacity(), 30);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_requires_a_full_quiet_interval() {
    let governor = ConcurrencyGovernor::new(GovernorConfig::default());
    for _ in 0..5 {
        governor.record_tls_error();
    }

    tokio::time::advance(Duration::from_secs(100)).await;
    governor.run_recovery_check();
    assert_eq!(governor.capacity(), 15);

    // Another error resets the quiet period.
    governor.record_tls_error();
    tokio::time::advance(Duration::from_secs(200)).await;
    governor.run_recovery_check();
    assert_eq!(governor.capacity(), 15);

    tokio::time::advance(Duration::from_secs(301)).await;
    governor.run_recovery_check();
    assert_eq!(governor.capacity(), 22);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_checks_are_throttled_on_acquire() {
    let governor = ConcurrencyGovernor::new(GovernorConfig::default());
    for _ in 0..5 {
        governor.record_tls_error();
    }
    assert_eq!(governor.capacity(), 15);

    tokio::time::advance(Duration::from_secs(301)).await;
    let first = governor.acquire().await;
    assert_eq!(governor.capacity(), 22);

    // A second acquire inside the same interval must not recover again.
    let second = governor.acquire().await;
    assert_eq!(governor.capacity(), 22);
    drop(first);
    drop(second);
}

// ============================================================================
// Governor: manual override and sharing
// ============================================================================

#[test]
fn test_manual_override_clamps_to_hard_ceiling() {
    let governor = ConcurrencyGovernor::new(GovernorConfig::default());

    assert_eq!(governor.set_capacity(500), HARD_CEILING);
    assert_eq!(governor.capacity(), HARD_CEILING);

    assert_eq!(governor.set_capacity(0), 1);
    assert_eq!(governor.capacity(), 1);
}

#[tokio::test]
async fn test_capacity_change_does_not_preempt_in_flight_permits() {
    let governor =
        ConcurrencyGovernor::new(GovernorConfig::default().with_max_concurrent_requests(2));
    let first = governor.acquire().await;
    let second = governor.acquire().await;

    governor.set_capacity(1);

    // The new gate has its own unit; old holders are untouched.
    let third = governor.acquire().await;
    assert_eq!(governor.snapshot().available, 0);

    // Old permits return to the gate they came from, not the new one.
    drop(first);
    drop(second);
    assert_eq!(governor.snapshot().available, 0);

    drop(third);
    assert_eq!(governor.snapshot().available, 1);
}

#[test]
fn test_shared_governor_is_one_instance() {
    let first = ConcurrencyGovernor::shared();
    let second = ConcurrencyGovernor::shared();
    assert!(Arc::ptr_eq(&first, &second));
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test]
async fn test_get_page_decodes_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/matches"))
        .and(query_param("offset", "0"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope_body(2, 0)))
        .mount(&server)
        .await;

    let transport = Transport::new(test_config(server.uri())).unwrap();
    let query = vec![
        ("offset".to_string(), "0".to_string()),
        ("limit".to_string(), "2".to_string()),
    ];
    let page = transport.get_page("/matches", &query).await.unwrap().unwrap();

    assert_eq!(page.len(), 2);
    assert_eq!(page.start, 0);
}

#[tokio::test]
async fn test_get_page_none_on_null_or_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/null"))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/empty"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let transport = Transport::new(test_config(server.uri())).unwrap();
    assert!(transport.get_page("/null", &[]).await.unwrap().is_none());
    assert!(transport.get_page("/empty", &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_client_error_is_terminal_and_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such team"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Transport::new(test_config(server.uri())).unwrap();
    let err = transport.get_page("/missing", &[]).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Status { status: 404, ref message } if message == "no such team"
    ));
}

#[tokio::test]
async fn test_server_error_is_retried_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope_body(1, 0)))
        .mount(&server)
        .await;

    let transport = Transport::new(test_config(server.uri())).unwrap();
    let page = transport.get_page("/flaky", &[]).await.unwrap();
    assert!(page.is_some());
}

#[tokio::test]
async fn test_retry_budget_spends_exactly_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .expect(3)
        .mount(&server)
        .await;

    let transport = Transport::new(test_config(server.uri())).unwrap();
    let err = transport.get_page("/down", &[]).await.unwrap_err();

    // The third attempt's error propagates unchanged.
    assert!(matches!(err, Error::Status { status: 503, .. }));
    server.verify().await;
}

#[tokio::test]
async fn test_malformed_success_body_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Transport::new(test_config(server.uri())).unwrap();
    let err = transport.get_page("/garbled", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Decode { .. }));
}

#[tokio::test]
async fn test_rate_limited_retries_after_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0")
                .set_body_string("slow down"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope_body(1, 0)))
        .mount(&server)
        .await;

    let transport = Transport::new(test_config(server.uri())).unwrap();
    let page = transport.get_page("/limited", &[]).await.unwrap();
    assert!(page.is_some());
}

#[tokio::test]
async fn test_cancelled_transport_does_not_call_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/never"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let token = CancellationToken::new();
    token.cancel();
    let transport = Transport::new(test_config(server.uri()))
        .unwrap()
        .with_cancellation(token);

    let err = transport.get_page("/never", &[]).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    server.verify().await;
}

#[tokio::test]
async fn test_paged_endpoint_sends_pagination_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/matches"))
        .and(query_param("offset", "5"))
        .and(query_param("limit", "10"))
        .and(query_param("to", "99"))
        .and(query_param("team", "blue"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope_body(1, 5)))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Arc::new(Transport::new(test_config(server.uri())).unwrap());
    let mut endpoint = PagedEndpoint::new(
        Arc::clone(&transport),
        "/v1/matches",
        PaginationLimits::new(10, 10_000).unwrap(),
    )
    .with_query("team", "blue");

    let request = PageRequest {
        offset: 5,
        limit: 10,
        start: None,
        to: Some(99),
    };
    let page = endpoint.fetch_page(&request).await.unwrap();
    assert!(page.is_some());
    server.verify().await;
}

#[tokio::test]
async fn test_transport_shares_an_explicit_governor() {
    let governor = Arc::new(ConcurrencyGovernor::new(GovernorConfig::default()));
    let first =
        Transport::with_governor(test_config("http://localhost:1".into()), Arc::clone(&governor))
            .unwrap();
    let second =
        Transport::with_governor(test_config("http://localhost:1".into()), Arc::clone(&governor))
            .unwrap();

    assert!(Arc::ptr_eq(first.governor(), second.governor()));
}

// ============================================================================
// Blocking transport
// ============================================================================

#[test]
fn test_blocking_transport_get_page() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope_body(3, 0)))
            .mount(&server)
            .await;
        server
    });

    let transport = BlockingTransport::new(test_config(server.uri())).unwrap();
    let page = transport.get_page("/items", &[]).unwrap().unwrap();
    assert_eq!(page.len(), 3);
}

#[test]
fn test_blocking_transport_terminal_error() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let server = rt.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .expect(1)
            .mount(&server)
            .await;
        server
    });

    let transport = BlockingTransport::new(test_config(server.uri())).unwrap();
    let err = transport.get_page("/missing", &[]).unwrap_err();
    assert!(matches!(err, Error::Status { status: 404, .. }));
}

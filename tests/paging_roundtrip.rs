//! End-to-end pagination over a mock HTTP server

use pagepool::{
    gather, ClientConfig, CollectOptions, Collected, MaxItems, PagedEndpoint, PaginationLimits,
    ReturnFormat, Transport,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serves slices of a fixed dataset according to offset/limit query
/// parameters, the way the real paged endpoints behave.
struct PagedResponder {
    total: usize,
}

impl Respond for PagedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut offset = 0usize;
        let mut limit = 2usize;
        for (key, value) in request.url.query_pairs() {
            match key.as_ref() {
                "offset" => offset = value.parse().unwrap_or(0),
                "limit" => limit = value.parse().unwrap_or(2),
                _ => {}
            }
        }
        let items: Vec<_> = (offset..self.total.min(offset + limit))
            .map(|i| json!({ "id": i, "name": format!("player-{i}") }))
            .collect();
        let count = items.len();
        ResponseTemplate::new(200).set_body_json(json!({
            "items": items,
            "start": offset,
            "end": count,
        }))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagepool=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn config(base_url: String) -> ClientConfig {
    ClientConfig::builder()
        .base_url(base_url)
        .backoff(
            pagepool::BackoffType::Constant,
            Duration::from_millis(5),
            Duration::from_millis(50),
        )
        .no_rate_limit()
        .build()
}

#[tokio::test]
async fn gather_drains_a_paged_endpoint_in_order() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/players"))
        .respond_with(PagedResponder { total: 5 })
        .mount(&server)
        .await;

    let transport = Arc::new(Transport::new(config(server.uri())).unwrap());
    let endpoint = PagedEndpoint::new(
        Arc::clone(&transport),
        "/v1/players",
        PaginationLimits::new(2, 10_000).unwrap(),
    );

    let (collected, warnings) = gather(endpoint, CollectOptions::new())
        .await
        .unwrap();

    assert!(warnings.is_empty());
    assert_eq!(collected.len(), 5);
    // Object items resolve to the structured collection by default.
    let Collected::Collection(players) = collected else {
        panic!("expected a structured collection");
    };
    assert_eq!(players.first().unwrap()["id"], 0);
    assert_eq!(players.last().unwrap()["id"], 4);
    let ids: Vec<_> = players.iter().map(|p| p["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn gather_survives_a_rate_limited_first_page() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/players"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "0")
                .set_body_string("slow down"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/players"))
        .respond_with(PagedResponder { total: 3 })
        .mount(&server)
        .await;

    let transport = Arc::new(Transport::new(config(server.uri())).unwrap());
    let endpoint = PagedEndpoint::new(
        Arc::clone(&transport),
        "/v1/players",
        PaginationLimits::new(2, 10_000).unwrap(),
    );

    let (collected, _) = gather(
        endpoint,
        CollectOptions::new().with_format(ReturnFormat::Items),
    )
    .await
    .unwrap();

    assert_eq!(collected.len(), 3);
}

#[tokio::test]
async fn gather_respects_an_item_budget() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/players"))
        .respond_with(PagedResponder { total: 100 })
        .mount(&server)
        .await;

    let transport = Arc::new(Transport::new(config(server.uri())).unwrap());
    let endpoint = PagedEndpoint::new(
        Arc::clone(&transport),
        "/v1/players",
        PaginationLimits::new(10, 10_000).unwrap(),
    );

    let (collected, warnings) = gather(
        endpoint,
        CollectOptions::new().with_max_items(MaxItems::Items(25)),
    )
    .await
    .unwrap();

    assert!(warnings.is_empty());
    // ceil(25 / 10) = 3 pages; the final page is truncated to 5 items.
    assert_eq!(collected.len(), 25);
}

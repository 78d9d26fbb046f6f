use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reqon::http::auth::build_auth_provider;
use reqon::http::client::{HttpClient, HttpRequest};
use reqon::pagination::{ArrayFieldCache, CacheKey, Paginator};
use reqon::program::{
    AuthKind, CircuitBreakerConfig, HttpMethod, PaginationKind, PaginationSpec, RateLimitPolicyConfig, RateLimitStrategy,
};
use reqon::resilience::{CircuitBreaker, RateLimiter};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

const PAGE_COUNTS: &[u32] = &[4, 16, 64];
const ITEMS_PER_PAGE: usize = 25;

fn page_body(page: u32) -> serde_json::Value {
    let items: Vec<serde_json::Value> = (0..ITEMS_PER_PAGE)
        .map(|i| serde_json::json!({ "id": page as usize * ITEMS_PER_PAGE + i }))
        .collect();
    serde_json::json!({ "items": items })
}

async fn client_for(base_url: String) -> HttpClient {
    let credentials = reqon::executor::Credentials::default();
    let auth = build_auth_provider(AuthKind::None, "bench", &credentials, reqwest::Client::new()).expect("auth");
    HttpClient::new(
        "bench",
        base_url,
        reqwest::Client::new(),
        auth,
        Arc::new(RateLimiter::new(None)),
        Arc::new(CircuitBreaker::new(None)),
        RateLimitPolicyConfig { strategy: RateLimitStrategy::Pause, ..Default::default() },
        CircuitBreakerConfig::default(),
    )
}

fn pagination_throughput(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("pagination_fetch_all");

    for &pages in PAGE_COUNTS {
        group.throughput(Throughput::Elements(u64::from(pages) * ITEMS_PER_PAGE as u64));
        group.bench_with_input(BenchmarkId::from_parameter(pages), &pages, |b, &pages| {
            b.to_async(&runtime).iter(|| async move {
                let server = httpmock::MockServer::start_async().await;
                for page in 0..pages {
                    let offset = page * ITEMS_PER_PAGE as u32;
                    server
                        .mock_async(|when, then| {
                            when.method(httpmock::Method::GET).path("/records").query_param("offset", offset.to_string());
                            then.status(200).json_body(page_body(page));
                        })
                        .await;
                }
                // one empty page past the last to signal the natural offset stop.
                let final_offset = pages * ITEMS_PER_PAGE as u32;
                server
                    .mock_async(|when, then| {
                        when.method(httpmock::Method::GET)
                            .path("/records")
                            .query_param("offset", final_offset.to_string());
                        then.status(200).json_body(serde_json::json!({ "items": [] }));
                    })
                    .await;

                let client = Arc::new(client_for(server.base_url()).await);
                let cache = Arc::new(ArrayFieldCache::new());
                let paginator = Paginator::new(client, cache);
                let cancel = CancellationToken::new();
                let spec = PaginationSpec {
                    kind: PaginationKind::Offset,
                    param: "offset".to_string(),
                    page_size: ITEMS_PER_PAGE as u32,
                    next_path: None,
                    array_field: Some("items".to_string()),
                    until: None,
                    max_pages: pages + 2,
                };
                let cache_key = CacheKey { action: "bench".to_string(), step_index: 0 };
                let request = HttpRequest::new(HttpMethod::Get, "/records");
                let result = paginator.fetch_all(request, &spec, cache_key, &cancel, |_| false).await.expect("fetch_all");
                assert_eq!(result.len(), pages as usize * ITEMS_PER_PAGE);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, pagination_throughput);
criterion_main!(benches);

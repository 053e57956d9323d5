//! Client behaviour against an in-memory paginated upstream.
//!
//! All tests run on tokio's paused clock, so rate-limit waits, backoff sleeps
//! and TTL expiry advance virtual time only.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use harvest_core::HarvestError;
use harvest_http::{
    ClientConfig, FetchAllOptions, FullPageHeuristic, GetOptions, PageErrorPolicy, Params,
    RateLimitedCachingClient, ShortPageOnly, Transport,
};
use serde_json::{Value, json};

/// Paginated dataset of `total` integers, `{"data": [...], "next": ...}` pages.
struct MockTransport {
    total: usize,
    calls: AtomicUsize,
    latency: Duration,
    /// Fail this many calls before answering
    failures: AtomicUsize,
    /// Pages (1-based) that always fail
    broken_pages: Vec<usize>,
}

impl MockTransport {
    fn new(total: usize) -> Self {
        Self {
            total,
            calls: AtomicUsize::new(0),
            latency: Duration::from_millis(50),
            failures: AtomicUsize::new(0),
            broken_pages: Vec::new(),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get_json(&self, _url: &str, params: &Params) -> Result<Value, HarvestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;

        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(HarvestError::UpstreamHttp {
                status: 503,
                message: "unavailable".to_string(),
            });
        }

        let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
        let size: usize = params
            .get("page_size")
            .and_then(|p| p.parse().ok())
            .unwrap_or(10);
        if self.broken_pages.contains(&page) {
            return Err(HarvestError::UpstreamHttp {
                status: 500,
                message: "boom".to_string(),
            });
        }
        let start = (page - 1) * size;
        let end = (start + size).min(self.total);
        let data: Vec<Value> = (start..end.max(start)).map(|i| json!(i)).collect();
        let next = if end < self.total {
            json!(format!("/items?page={}", page + 1))
        } else {
            Value::Null
        };
        Ok(json!({ "data": data, "next": next }))
    }
}

fn config() -> ClientConfig {
    ClientConfig {
        base_url: "https://upstream.test".to_string(),
        requests_per_second: 10.0,
        retry_attempts: 3,
        retry_base_delay_ms: 100,
        cache_ttl_ms: 60_000,
        ..Default::default()
    }
}

fn client(transport: &Arc<MockTransport>, config: ClientConfig) -> RateLimitedCachingClient {
    RateLimitedCachingClient::new(config, transport.clone()).unwrap()
}

fn page_params(page: u32) -> Params {
    let mut p = Params::new();
    p.insert("page".to_string(), page.to_string());
    p.insert("page_size".to_string(), "10".to_string());
    p
}

fn opts_with_next_link(page_size: usize) -> FetchAllOptions {
    FetchAllOptions::default()
        .with_page_size(page_size)
        .with_items_pointer("/data")
        .with_policy(FullPageHeuristic {
            next_link_pointer: Some("/next".to_string()),
        })
}

#[tokio::test(start_paused = true)]
async fn fetch_all_returns_items_in_order_with_one_request_per_page() {
    for (n, p) in [(95usize, 10usize), (100, 10), (7, 25), (1, 1)] {
        let transport = Arc::new(MockTransport::new(n));
        let client = client(&transport, config());
        let result = client
            .fetch_all("/items", &Params::new(), &opts_with_next_link(p))
            .await;

        assert!(result.complete);
        assert!(result.failed_pages.is_empty());
        let expected: Vec<Value> = (0..n).map(|i| json!(i)).collect();
        assert_eq!(result.items, expected, "n={n} p={p}");
        assert_eq!(transport.calls(), n.div_ceil(p), "n={n} p={p}");
        assert_eq!(result.pages_fetched as usize, n.div_ceil(p));
    }
}

#[tokio::test(start_paused = true)]
async fn short_page_policy_needs_extra_request_on_exact_multiple() {
    let transport = Arc::new(MockTransport::new(20));
    let client = client(&transport, config());
    let opts = FetchAllOptions::default()
        .with_page_size(10)
        .with_items_pointer("/data")
        .with_policy(ShortPageOnly);
    let result = client.fetch_all("/items", &Params::new(), &opts).await;
    assert_eq!(result.items.len(), 20);
    // third page comes back empty
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_gets_share_one_request() {
    let transport = Arc::new(MockTransport::new(50));
    let client = client(&transport, config());
    let params = page_params(1);

    let (a, b) = tokio::join!(
        client.get("/items", &params, GetOptions::default()),
        client.get("/items", &params, GetOptions::default()),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.stats().deduplicated, 1);
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn dedup_ignores_param_order_but_not_values() {
    let transport = Arc::new(MockTransport::new(50));
    let client = client(&transport, config());
    let first = page_params(1);
    let second = page_params(2);
    let (a, b) = tokio::join!(
        client.get("/items", &first, GetOptions::default()),
        client.get("/items", &second, GetOptions::default()),
    );
    assert_ne!(a.unwrap(), b.unwrap());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancelled_waiters_do_not_leak_pending_requests() {
    let transport = Arc::new(MockTransport {
        latency: Duration::from_secs(5),
        ..MockTransport::new(1000)
    });
    let mut cfg = config();
    cfg.cache_ttl_ms = 600_000;
    let client = client(&transport, cfg);

    for page in 1..=50 {
        let params = page_params(page);
        let waited = tokio::time::timeout(
            Duration::from_secs(1),
            client.get("/items", &params, GetOptions::default()),
        )
        .await;
        assert!(waited.is_err(), "page {page} should outlast the caller");
    }

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(client.in_flight(), 0);
    assert_eq!(transport.calls(), 50);

    // abandoned requests still completed and filled the cache
    client
        .get("/items", &page_params(7), GetOptions::default())
        .await
        .unwrap();
    assert_eq!(transport.calls(), 50);
    assert_eq!(client.stats().cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn cache_hit_within_ttl() {
    let transport = Arc::new(MockTransport::new(50));
    let client = client(&transport, config());
    let params = page_params(1);
    client.get("/items", &params, GetOptions::default()).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    client.get("/items", &params, GetOptions::default()).await.unwrap();
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.stats().cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn expired_entry_triggers_new_request() {
    let transport = Arc::new(MockTransport::new(50));
    let client = client(&transport, config());
    let params = page_params(1);
    client.get("/items", &params, GetOptions::default()).await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    client.get("/items", &params, GetOptions::default()).await.unwrap();
    assert_eq!(transport.calls(), 2);
    assert_eq!(client.stats().cache_hits, 0);
}

#[tokio::test(start_paused = true)]
async fn bypassing_cache_refetches() {
    let transport = Arc::new(MockTransport::new(50));
    let client = client(&transport, config());
    let params = page_params(1);
    client.get("/items", &params, GetOptions::default()).await.unwrap();
    client
        .get("/items", &params, GetOptions { use_cache: false })
        .await
        .unwrap();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried() {
    let transport = Arc::new(MockTransport::new(50));
    transport.failures.store(2, Ordering::SeqCst);
    let client = client(&transport, config());
    let body = client
        .get("/items", &page_params(1), GetOptions::default())
        .await
        .unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 10);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_to_caller() {
    let transport = Arc::new(MockTransport::new(50));
    transport.failures.store(10, Ordering::SeqCst);
    let client = client(&transport, config());
    let err = client
        .get("/items", &page_params(1), GetOptions::default())
        .await
        .unwrap_err();
    match err {
        HarvestError::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, HarvestError::UpstreamHttp { status: 503, .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
    // failed result is not cached and the pending slot is released
    assert_eq!(client.stats().cached_entries, 0);
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn physical_requests_respect_rate_limit() {
    let transport = Arc::new(MockTransport::new(1000));
    let mut cfg = config();
    cfg.requests_per_second = 2.0;
    let client = client(&transport, cfg);
    let start = tokio::time::Instant::now();
    for page in 1..=5 {
        client
            .get("/items", &page_params(page), GetOptions::default())
            .await
            .unwrap();
    }
    // 4 gaps of at least 500ms between 5 requests
    assert!(start.elapsed() >= Duration::from_millis(2000));
    assert_eq!(client.stats().rate_limit_waits, 4);
}

#[tokio::test(start_paused = true)]
async fn page_failure_stops_by_default_with_partial_items() {
    let mut transport = MockTransport::new(50);
    transport.broken_pages = vec![3];
    let transport = Arc::new(transport);
    let client = client(&transport, config());
    let result = client
        .fetch_all("/items", &Params::new(), &opts_with_next_link(10))
        .await;
    assert!(!result.complete);
    assert_eq!(result.items.len(), 20);
    assert_eq!(result.failed_pages.len(), 1);
    assert_eq!(result.failed_pages[0].0, 3);
}

#[tokio::test(start_paused = true)]
async fn skip_policy_continues_past_broken_page() {
    let mut transport = MockTransport::new(50);
    transport.broken_pages = vec![2];
    let transport = Arc::new(transport);
    let client = client(&transport, config());
    let opts = opts_with_next_link(10)
        .with_page_error_policy(PageErrorPolicy::Skip { max_consecutive: 2 });
    let result = client.fetch_all("/items", &Params::new(), &opts).await;
    assert!(result.complete);
    assert_eq!(result.items.len(), 40);
    assert_eq!(result.failed_pages.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn max_pages_guard_stops_without_error() {
    let transport = Arc::new(MockTransport::new(1000));
    let client = client(&transport, config());
    let opts = opts_with_next_link(10).with_max_pages(3);
    let result = client.fetch_all("/items", &Params::new(), &opts).await;
    assert!(result.hit_max_pages);
    assert!(!result.complete);
    assert_eq!(result.items.len(), 30);
    assert!(result.into_items().is_ok());
}

#[tokio::test(start_paused = true)]
async fn zero_page_size_fails_without_requests() {
    let transport = Arc::new(MockTransport::new(50));
    let client = client(&transport, config());
    let opts = opts_with_next_link(0);
    let result = client.fetch_all("/items", &Params::new(), &opts).await;
    assert!(!result.complete);
    assert!(!result.hit_max_pages);
    assert_eq!(result.pages_fetched, 0);
    assert!(matches!(
        result.failed_pages.as_slice(),
        [(1, HarvestError::Validation(_))]
    ));
    assert_eq!(transport.calls(), 0);
}

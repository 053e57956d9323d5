//! Rate-limited, caching, deduplicating upstream client
//!
//! Request path for `get`:
//! cache hit → return; in-flight request for the same key → join it;
//! otherwise rate-limit slot → GET (retried with backoff) → cache → return.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use harvest_core::{Backoff, HarvestError, execute_with_retry};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::time::Instant;

use crate::cache::TtlCache;
use crate::config::ClientConfig;
use crate::pagination::{FetchAllOptions, PageErrorPolicy, PageView, PagedResult, extract_items};
use crate::rate_limit::RateLimiter;
use crate::transport::{Params, ReqwestTransport, Transport};

type SharedFetch = Shared<BoxFuture<'static, Result<Value, HarvestError>>>;

/// Per-call options for [`RateLimitedCachingClient::get`].
#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    /// Skip the cache lookup (the fresh response is still cached)
    pub use_cache: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self { use_cache: true }
    }
}

/// Snapshot of client counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Calls that joined an identical in-flight request
    pub deduplicated: u64,
    /// Network calls actually issued, retries included
    pub physical_requests: u64,
    pub rate_limit_waits: u64,
    pub evictions: u64,
    pub cached_entries: usize,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    deduplicated: AtomicU64,
    physical_requests: AtomicU64,
}

/// Cache key: endpoint plus params in sorted order.
pub fn cache_key(endpoint: &str, params: &Params) -> String {
    let mut key = endpoint.to_string();
    for (i, (k, v)) in params.iter().enumerate() {
        key.push(if i == 0 { '?' } else { '&' });
        key.push_str(k);
        key.push('=');
        key.push_str(v);
    }
    key
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    cache: Mutex<TtlCache>,
    pending: Mutex<FxHashMap<String, SharedFetch>>,
    limiter: RateLimiter,
    backoff: Backoff,
    counters: Counters,
}

/// Single egress point for upstream reads. Cheap to clone.
#[derive(Clone)]
pub struct RateLimitedCachingClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RateLimitedCachingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedCachingClient")
            .field("base_url", &self.inner.config.base_url)
            .field("rps", &self.inner.config.requests_per_second)
            .finish_non_exhaustive()
    }
}

/// Poisoning only happens if a holder panicked; the guarded maps stay consistent.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl RateLimitedCachingClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, HarvestError> {
        config.validate()?;
        let inner = Inner {
            cache: Mutex::new(TtlCache::new(config.max_cache_entries, config.cache_ttl())),
            pending: Mutex::new(FxHashMap::default()),
            limiter: RateLimiter::new(config.min_interval()),
            backoff: config.backoff(),
            counters: Counters::default(),
            transport,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Client backed by [`ReqwestTransport`].
    pub fn from_config(config: ClientConfig) -> Result<Self, HarvestError> {
        let transport = ReqwestTransport::new(&config)?;
        Self::new(config, Arc::new(transport))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// GET `endpoint` with `params`, served from cache or a shared in-flight call.
    ///
    /// The physical request runs as a spawned task, so this must be called
    /// from within a tokio runtime.
    pub async fn get(
        &self,
        endpoint: &str,
        params: &Params,
        opts: GetOptions,
    ) -> Result<Value, HarvestError> {
        let key = cache_key(endpoint, params);
        let counters = &self.inner.counters;

        if opts.use_cache {
            if let Some(hit) = lock(&self.inner.cache).get(&key, Instant::now()) {
                counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
            counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let fetch = {
            let mut pending = lock(&self.inner.pending);
            match pending.get(&key) {
                Some(in_flight) => {
                    counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                    log::trace!("joining in-flight request {key}");
                    in_flight.clone()
                }
                None => {
                    // Runs to completion even if every waiter is cancelled
                    let task = tokio::spawn(Arc::clone(&self.inner).fetch(
                        key.clone(),
                        endpoint.to_string(),
                        params.clone(),
                    ));
                    let fetch = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(HarvestError::Network {
                                message: format!("request task ended early: {e}"),
                                timeout: false,
                            })
                        })
                    }
                    .boxed()
                    .shared();
                    pending.insert(key, fetch.clone());
                    fetch
                }
            }
        };
        fetch.await
    }

    /// Fetch every page of `endpoint`, strictly in sequence.
    ///
    /// Page failures are recorded in the result rather than returned, so the
    /// caller decides whether a partial dataset is acceptable. Invalid options
    /// are reported as a failure of the first page without any request.
    pub async fn fetch_all(
        &self,
        endpoint: &str,
        params: &Params,
        opts: &FetchAllOptions,
    ) -> PagedResult {
        let mut result = PagedResult::default();
        let mut page = opts.first_page;
        if let Err(e) = opts.validate() {
            log::warn!("{endpoint}: {e}");
            result.failed_pages.push((page, e));
            return result;
        }
        let mut consecutive_failures = 0u32;
        let get_opts = GetOptions {
            use_cache: opts.use_cache,
        };

        loop {
            let attempted = result.pages_fetched + result.failed_pages.len() as u32;
            if attempted >= opts.max_pages {
                log::warn!(
                    "{endpoint}: stopped at max_pages={} with {} items; results may be incomplete",
                    opts.max_pages,
                    result.items.len()
                );
                result.hit_max_pages = true;
                break;
            }

            let mut page_params = params.clone();
            page_params.insert(opts.page_param.clone(), page.to_string());
            page_params.insert(opts.size_param.clone(), opts.page_size.to_string());

            let outcome = self
                .get(endpoint, &page_params, get_opts)
                .await
                .and_then(|body| {
                    let items = extract_items(&body, opts.items_pointer.as_deref())?;
                    Ok((body, items))
                });

            match outcome {
                Ok((body, items)) => {
                    consecutive_failures = 0;
                    result.pages_fetched += 1;
                    let more = opts.policy.has_more(&PageView {
                        page,
                        requested_size: opts.page_size,
                        item_count: items.len(),
                        body: &body,
                    });
                    log::debug!("{endpoint}: page {page} → {} items", items.len());
                    result.items.extend(items);
                    if !more {
                        result.complete = true;
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("{endpoint}: page {page} failed: {e}");
                    result.failed_pages.push((page, e));
                    match opts.on_page_error {
                        PageErrorPolicy::Stop => break,
                        PageErrorPolicy::Skip { max_consecutive } => {
                            consecutive_failures += 1;
                            if consecutive_failures >= max_consecutive.max(1) {
                                log::warn!(
                                    "{endpoint}: {consecutive_failures} consecutive page failures, giving up"
                                );
                                break;
                            }
                        }
                    }
                }
            }
            page += 1;
        }
        result
    }

    pub fn stats(&self) -> ClientStats {
        let c = &self.inner.counters;
        let cache = lock(&self.inner.cache);
        ClientStats {
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            cache_misses: c.cache_misses.load(Ordering::Relaxed),
            deduplicated: c.deduplicated.load(Ordering::Relaxed),
            physical_requests: c.physical_requests.load(Ordering::Relaxed),
            rate_limit_waits: self.inner.limiter.waits(),
            evictions: cache.evictions(),
            cached_entries: cache.len(),
        }
    }

    pub fn clear_cache(&self) {
        lock(&self.inner.cache).clear();
    }

    /// Number of requests currently in flight
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.pending).len()
    }
}

/// Releases a pending key when its owner fetch finishes, fails or is dropped.
struct PendingSlot {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        lock(&self.inner.pending).remove(&self.key);
    }
}

impl Inner {
    /// Owner side of a deduplicated request.
    async fn fetch(
        self: Arc<Self>,
        key: String,
        endpoint: String,
        params: Params,
    ) -> Result<Value, HarvestError> {
        let _slot = PendingSlot {
            inner: Arc::clone(&self),
            key: key.clone(),
        };
        let url = self.config.url_for(&endpoint);
        let label = format!("GET {endpoint}");
        let result = execute_with_retry(
            &label,
            self.config.retry_attempts,
            &self.backoff,
            || self.physical_get(&url, &params),
        )
        .await;

        // Cache before releasing the pending slot so a late caller sees a hit
        if let Ok(payload) = &result {
            let now = Instant::now();
            let mut cache = lock(&self.cache);
            cache.insert(key.clone(), payload.clone(), now);
            if rand::random::<f64>() < self.config.sweep_probability {
                let dropped = cache.purge_expired(now);
                if dropped > 0 {
                    log::debug!("cache sweep dropped {dropped} expired entries");
                }
            }
        }
        result
    }

    async fn physical_get(&self, url: &str, params: &Params) -> Result<Value, HarvestError> {
        self.limiter.acquire().await;
        self.counters
            .physical_requests
            .fetch_add(1, Ordering::Relaxed);
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, self.transport.get_json(url, params)).await {
            Ok(result) => result,
            Err(_) => Err(HarvestError::Network {
                message: format!("no response within {timeout:?}"),
                timeout: true,
            }),
        }
    }
}

//! Harvest HTTP - rate-limited, caching, deduplicating upstream client
//!
//! Single egress point for upstream reads: a requests/second ceiling, a TTL
//! read-through cache, at-most-one-in-flight request per key, retry with
//! jittered backoff and transparent multi-page fetching.

pub mod cache;
pub mod client;
pub mod config;
pub mod pagination;
pub mod rate_limit;
pub mod transport;

// Re-exports for convenience
pub use cache::TtlCache;
pub use client::{ClientStats, GetOptions, RateLimitedCachingClient, cache_key};
pub use config::ClientConfig;
pub use pagination::{
    FetchAllOptions, FullPageHeuristic, NextLinkOnly, PageErrorPolicy, PageView, PagedResult,
    PaginationPolicy, ShortPageOnly,
};
pub use rate_limit::RateLimiter;
pub use transport::{Params, ReqwestTransport, Transport};

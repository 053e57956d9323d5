//! Upstream client configuration

use std::time::Duration;

use harvest_core::{Backoff, HarvestError};
use serde::Deserialize;

/// Settings for [`RateLimitedCachingClient`](crate::RateLimitedCachingClient).
///
/// Durations are plain milliseconds so the struct maps 1:1 onto TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix joined with every endpoint
    pub base_url: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    pub requests_per_second: f64,
    pub request_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub cache_ttl_ms: u64,
    pub max_cache_entries: usize,
    /// Chance that a completed request also purges expired cache entries
    pub sweep_probability: f64,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            requests_per_second: 5.0,
            request_timeout_ms: 30_000,
            retry_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            cache_ttl_ms: 5 * 60 * 1000,
            max_cache_entries: 1_000,
            sweep_probability: 0.01,
            user_agent: concat!("harvest/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), HarvestError> {
        if !(self.requests_per_second.is_finite() && self.requests_per_second > 0.0) {
            return Err(HarvestError::config(format!(
                "requests_per_second must be > 0, got {}",
                self.requests_per_second
            )));
        }
        if self.max_cache_entries == 0 {
            return Err(HarvestError::config("max_cache_entries must be >= 1"));
        }
        if self.retry_attempts == 0 {
            return Err(HarvestError::config("retry_attempts must be >= 1"));
        }
        if self.request_timeout_ms == 0 {
            return Err(HarvestError::config("request_timeout_ms must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.sweep_probability) {
            return Err(HarvestError::config("sweep_probability must be within [0, 1]"));
        }
        Ok(())
    }

    /// Minimum spacing between two physical requests: `1000 / rps` ms
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.requests_per_second)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    /// Join `base_url` and `endpoint` with exactly one slash.
    ///
    /// Absolute endpoints (`http://`, `https://`) are used as-is.
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        if self.base_url.is_empty() {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

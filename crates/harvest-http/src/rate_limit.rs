//! Minimum-interval rate limiter

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces physical requests at least `min_interval` apart.
///
/// The lock is held across the wait, so request *timing* is serialized while
/// unrelated work on other tasks keeps running.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
    waits: AtomicU64,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
            waits: AtomicU64::new(0),
        }
    }

    pub fn per_second(rps: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / rps))
    }

    /// Wait for the next slot; returns how long this call slept.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_request.lock().await;
        let mut waited = Duration::ZERO;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                self.waits.fetch_add(1, Ordering::Relaxed);
                log::trace!("rate limit: waiting {waited:?}");
                tokio::time::sleep(waited).await;
            }
        }
        *last = Some(Instant::now());
        waited
    }

    /// Number of acquisitions that had to sleep
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

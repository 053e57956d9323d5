//! Exponential backoff with jitter, shared by the HTTP client and the bulk writer

use std::future::Future;
use std::time::Duration;

use crate::error::HarvestError;

/// Default jitter: uniform ±20% around the exponential delay
pub const DEFAULT_JITTER: f64 = 0.2;

/// Default ceiling for a single backoff sleep
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Backoff schedule: `base * 2^attempt`, jittered, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay used as jitter amplitude (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: DEFAULT_JITTER,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, rand::random::<f64>())
    }

    /// Deterministic core of [`next_delay`](Self::next_delay); `unit` is in `[0, 1)`.
    fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(32) as i32);
        // unit 0.0 → -jitter, unit 1.0 → +jitter
        let factor = 1.0 + self.jitter * (unit * 2.0 - 1.0);
        let secs = (exp * factor).min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(secs)
    }
}

/// Invoke `operation` until it succeeds, fails non-retryably, or `max_attempts`
/// calls have been made.
///
/// Exhaustion yields [`HarvestError::RetriesExhausted`] tagged with `label` and
/// the attempt count. Sleeps cooperatively between attempts.
pub async fn execute_with_retry<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    backoff: &Backoff,
    mut operation: F,
) -> Result<T, HarvestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HarvestError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(v) => {
                if attempt > 0 {
                    log::debug!("{label}: succeeded after {attempt} retries");
                }
                return Ok(v);
            }
            Err(e) if !e.is_retryable() => {
                log::debug!("{label}: non-retryable failure: {e}");
                return Err(e);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    log::warn!("{label}: failed permanently after {attempt} attempts: {e}");
                    return Err(HarvestError::RetriesExhausted {
                        label: label.to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                let delay = backoff.next_delay(attempt - 1);
                log::debug!(
                    "{label}: attempt {attempt}/{max_attempts} failed: {e}, retrying in {delay:?}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flaky() -> HarvestError {
        HarvestError::Network {
            message: "reset".to_string(),
            timeout: false,
        }
    }

    #[test]
    fn delay_exponential_without_jitter() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_secs(10)).with_jitter(0.0);
        assert_eq!(b.next_delay(0), Duration::from_millis(100));
        assert_eq!(b.next_delay(1), Duration::from_millis(200));
        assert_eq!(b.next_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_capped_at_max() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(5)).with_jitter(0.0);
        assert_eq!(b.next_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn jitter_bounds() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        assert!((b.delay_with(1, 0.0).as_secs_f64() - 1.6).abs() < 1e-6);
        assert_eq!(b.delay_with(1, 0.5), Duration::from_secs(2));
        for _ in 0..100 {
            let d = b.next_delay(1).as_secs_f64();
            assert!((1.6..=2.4).contains(&d), "delay {d} out of ±20%");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = execute_with_retry("op", 5, &Backoff::default(), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(flaky())
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_tags_label_and_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = execute_with_retry("GET /x", 3, &Backoff::default(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(flaky())
            }
        })
        .await;
        match result {
            Err(HarvestError::RetriesExhausted {
                label, attempts, ..
            }) => {
                assert_eq!(label, "GET /x");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = execute_with_retry("op", 5, &Backoff::default(), || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(HarvestError::validation("bad"))
            }
        })
        .await;
        assert_eq!(result, Err(HarvestError::validation("bad")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

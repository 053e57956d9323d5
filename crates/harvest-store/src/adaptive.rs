//! Throughput-driven tuning of batch size and concurrency
//!
//! After every commit a [`PerformanceSample`] is recorded. Every `adapt_every`
//! commits the last [`WINDOW`] samples are classified into a [`NetworkTier`]
//! and the next commit's batch size and concurrency are adjusted:
//!
//! - excellent: grow gradually toward the ceilings
//! - good: hold; shrink slightly if success dips below target
//! - poor: halve both
//! - critical: drop to the floors
//!
//! Timeouts additionally trigger an immediate [`emergency`](AdaptiveTuner::emergency)
//! cut, independent of the periodic schedule.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use harvest_core::HarvestError;
use serde::Deserialize;

use crate::config::WriterConfig;

/// Samples considered when classifying the network
pub const WINDOW: usize = 5;

/// Multiplier applied to batch size and concurrency on a timeout
pub const EMERGENCY_FACTOR: f64 = 0.65;

/// Cut points for network classification. Empirical; tune per deployment.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct StabilityThresholds {
    pub excellent_success_rate: f64,
    pub good_success_rate: f64,
    pub good_timeout_rate: f64,
    pub poor_success_rate: f64,
    pub poor_timeout_rate: f64,
}

impl Default for StabilityThresholds {
    fn default() -> Self {
        Self {
            excellent_success_rate: 0.98,
            good_success_rate: 0.95,
            good_timeout_rate: 0.02,
            poor_success_rate: 0.85,
            poor_timeout_rate: 0.10,
        }
    }
}

impl StabilityThresholds {
    pub fn validate(&self) -> Result<(), HarvestError> {
        let ordered = self.excellent_success_rate >= self.good_success_rate
            && self.good_success_rate >= self.poor_success_rate
            && self.good_timeout_rate <= self.poor_timeout_rate;
        let in_range = [
            self.excellent_success_rate,
            self.good_success_rate,
            self.good_timeout_rate,
            self.poor_success_rate,
            self.poor_timeout_rate,
        ]
        .iter()
        .all(|r| (0.0..=1.0).contains(r));
        if ordered && in_range {
            Ok(())
        } else {
            Err(HarvestError::config(format!(
                "inconsistent stability thresholds: {self:?}"
            )))
        }
    }

    pub fn classify(&self, success_rate: f64, timeout_rate: f64) -> NetworkTier {
        if success_rate > self.excellent_success_rate && timeout_rate == 0.0 {
            NetworkTier::Excellent
        } else if success_rate > self.good_success_rate && timeout_rate < self.good_timeout_rate {
            NetworkTier::Good
        } else if success_rate > self.poor_success_rate && timeout_rate < self.poor_timeout_rate {
            NetworkTier::Poor
        } else {
            NetworkTier::Critical
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTier {
    Excellent,
    Good,
    Poor,
    Critical,
}

impl std::fmt::Display for NetworkTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Critical => "critical",
        })
    }
}

/// Outcome of one commit cycle.
#[derive(Debug, Clone)]
pub struct PerformanceSample {
    pub at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub sub_batches: usize,
    pub timeouts: usize,
    pub duration: Duration,
    pub ops_per_second: f64,
}

impl PerformanceSample {
    pub fn new(
        succeeded: usize,
        failed: usize,
        sub_batches: usize,
        timeouts: usize,
        duration: Duration,
    ) -> Self {
        // Clamp so an instantaneous commit does not divide by zero
        let secs = duration.as_secs_f64().max(0.001);
        Self {
            at: Utc::now(),
            succeeded,
            failed,
            sub_batches,
            timeouts,
            duration,
            ops_per_second: (succeeded + failed) as f64 / secs,
        }
    }
}

/// Parameters in force for the next commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub batch_size: usize,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
struct Limits {
    min_batch: usize,
    max_batch: usize,
    min_concurrency: usize,
    max_concurrency: usize,
    history_len: usize,
    adapt_every: usize,
    growth_min_ops_per_second: f64,
    target_success_rate: f64,
    thresholds: StabilityThresholds,
}

/// Adaptive state. Mutated only between commit cycles.
#[derive(Debug, Clone)]
pub struct AdaptiveTuner {
    limits: Limits,
    tuning: Tuning,
    history: VecDeque<PerformanceSample>,
    commits_since_adapt: usize,
    tier: Option<NetworkTier>,
}

impl AdaptiveTuner {
    pub fn new(config: &WriterConfig) -> Self {
        Self {
            limits: Limits {
                min_batch: config.min_batch_size,
                max_batch: config.max_operations_per_batch,
                min_concurrency: config.min_concurrency,
                max_concurrency: config.max_concurrent_batches,
                history_len: config.history_len,
                adapt_every: config.adapt_every,
                growth_min_ops_per_second: config.growth_min_ops_per_second,
                target_success_rate: config.target_success_rate,
                thresholds: config.thresholds,
            },
            tuning: Tuning {
                batch_size: config.initial_batch_size(),
                concurrency: config.initial_concurrency(),
            },
            history: VecDeque::new(),
            commits_since_adapt: 0,
            tier: None,
        }
    }

    pub fn tuning(&self) -> Tuning {
        self.tuning
    }

    /// Tier applied by the most recent adaptation
    pub fn tier(&self) -> Option<NetworkTier> {
        self.tier
    }

    pub fn history(&self) -> impl Iterator<Item = &PerformanceSample> {
        self.history.iter()
    }

    /// Forget samples; the current tuning is kept.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.commits_since_adapt = 0;
    }

    /// Success rate, timeout rate and mean throughput over the last [`WINDOW`] samples.
    pub fn window_rates(&self) -> (f64, f64, f64) {
        let recent: Vec<&PerformanceSample> = self.history.iter().rev().take(WINDOW).collect();
        if recent.is_empty() {
            return (1.0, 0.0, 0.0);
        }
        let ok: usize = recent.iter().map(|s| s.succeeded).sum();
        let total: usize = recent.iter().map(|s| s.succeeded + s.failed).sum();
        let batches: usize = recent.iter().map(|s| s.sub_batches).sum();
        let timeouts: usize = recent.iter().map(|s| s.timeouts).sum();
        let success = if total == 0 {
            1.0
        } else {
            ok as f64 / total as f64
        };
        let timeout = if batches == 0 {
            0.0
        } else {
            timeouts as f64 / batches as f64
        };
        let ops = recent.iter().map(|s| s.ops_per_second).sum::<f64>() / recent.len() as f64;
        (success, timeout, ops)
    }

    /// Append a sample; adapts when the schedule is due. Returns the applied tier.
    pub fn record(&mut self, sample: PerformanceSample) -> Option<NetworkTier> {
        self.history.push_back(sample);
        while self.history.len() > self.limits.history_len {
            self.history.pop_front();
        }
        self.commits_since_adapt += 1;
        if self.commits_since_adapt < self.limits.adapt_every {
            return None;
        }
        self.commits_since_adapt = 0;
        Some(self.adapt())
    }

    fn adapt(&mut self) -> NetworkTier {
        let (success, timeout, ops) = self.window_rates();
        let tier = self.limits.thresholds.classify(success, timeout);
        let l = &self.limits;
        let before = self.tuning;
        let t = &mut self.tuning;

        match tier {
            NetworkTier::Excellent => {
                if ops >= l.growth_min_ops_per_second {
                    let step = (t.batch_size / 10).max(1);
                    t.batch_size = (t.batch_size + step).min(l.max_batch);
                    t.concurrency = (t.concurrency + 1).min(l.max_concurrency);
                }
            }
            NetworkTier::Good => {
                if success < l.target_success_rate {
                    t.batch_size = scale(t.batch_size, 0.9, l.min_batch);
                }
            }
            NetworkTier::Poor => {
                t.batch_size = scale(t.batch_size, 0.5, l.min_batch);
                t.concurrency = scale(t.concurrency, 0.5, l.min_concurrency);
            }
            NetworkTier::Critical => {
                t.batch_size = l.min_batch;
                t.concurrency = l.min_concurrency;
            }
        }

        if self.tier != Some(tier) {
            let level = if matches!(tier, NetworkTier::Poor | NetworkTier::Critical) {
                log::Level::Warn
            } else {
                log::Level::Info
            };
            log::log!(
                level,
                "network {tier} (success {:.1}%, timeouts {:.1}%): batch {} → {}, concurrency {} → {}",
                success * 100.0,
                timeout * 100.0,
                before.batch_size,
                self.tuning.batch_size,
                before.concurrency,
                self.tuning.concurrency
            );
        }
        self.tier = Some(tier);
        tier
    }

    /// Immediate cut after a timeout-class failure.
    pub fn emergency(&mut self) {
        let before = self.tuning;
        self.tuning.batch_size = scale(
            self.tuning.batch_size,
            EMERGENCY_FACTOR,
            self.limits.min_batch,
        );
        self.tuning.concurrency = scale(
            self.tuning.concurrency,
            EMERGENCY_FACTOR,
            self.limits.min_concurrency,
        );
        log::warn!(
            "commit timeout: emergency downscale batch {} → {}, concurrency {} → {}",
            before.batch_size,
            self.tuning.batch_size,
            before.concurrency,
            self.tuning.concurrency
        );
    }
}

fn scale(value: usize, factor: f64, floor: usize) -> usize {
    ((value as f64 * factor).floor() as usize).max(floor)
}

//! Bulk writer configuration

use std::path::PathBuf;
use std::time::Duration;

use harvest_core::{Backoff, HarvestError};
use serde::Deserialize;

use crate::adaptive::StabilityThresholds;

/// Settings for [`AdaptiveBulkWriter`](crate::AdaptiveBulkWriter).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Hard per-sub-batch operation ceiling imposed by the store
    pub max_operations_per_batch: usize,
    /// Starting batch size; defaults to the ceiling
    pub initial_batch_size: Option<usize>,
    /// Floor the adaptation never goes below
    pub min_batch_size: usize,
    /// Cumulative payload bytes per sub-batch
    pub max_batch_bytes: usize,
    /// Largest serialized document accepted by `enqueue`
    pub max_document_bytes: usize,
    pub max_concurrent_batches: usize,
    /// Starting concurrency; defaults to the ceiling
    pub initial_concurrency: Option<usize>,
    pub min_concurrency: usize,
    pub commit_timeout_ms: u64,
    pub commit_retry_attempts: u32,
    pub commit_retry_base_delay_ms: u64,
    pub fallback_dir: PathBuf,
    /// Performance samples kept for adaptation
    pub history_len: usize,
    /// Adapt only every N commits
    pub adapt_every: usize,
    /// Growth in the excellent tier requires at least this throughput
    pub growth_min_ops_per_second: f64,
    /// In the good tier, shrink slightly when success dips below this
    pub target_success_rate: f64,
    pub thresholds: StabilityThresholds,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_operations_per_batch: 500,
            initial_batch_size: None,
            min_batch_size: 10,
            max_batch_bytes: 10 * 1024 * 1024,
            max_document_bytes: 1024 * 1024,
            max_concurrent_batches: 4,
            initial_concurrency: None,
            min_concurrency: 1,
            commit_timeout_ms: 120_000,
            commit_retry_attempts: 2,
            commit_retry_base_delay_ms: 500,
            fallback_dir: PathBuf::from("./fallback"),
            history_len: 20,
            adapt_every: 3,
            growth_min_ops_per_second: 50.0,
            target_success_rate: 0.97,
            thresholds: StabilityThresholds::default(),
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> Result<(), HarvestError> {
        let fail = |msg: String| Err(HarvestError::config(msg));
        if self.max_operations_per_batch == 0 {
            return fail("max_operations_per_batch must be >= 1".into());
        }
        if self.min_batch_size == 0 || self.min_batch_size > self.max_operations_per_batch {
            return fail(format!(
                "min_batch_size {} must be within 1..={}",
                self.min_batch_size, self.max_operations_per_batch
            ));
        }
        if self.max_document_bytes > self.max_batch_bytes {
            return fail(format!(
                "max_document_bytes {} exceeds max_batch_bytes {}",
                self.max_document_bytes, self.max_batch_bytes
            ));
        }
        if self.min_concurrency == 0 || self.min_concurrency > self.max_concurrent_batches {
            return fail(format!(
                "min_concurrency {} must be within 1..={}",
                self.min_concurrency, self.max_concurrent_batches
            ));
        }
        if self.commit_timeout_ms == 0 {
            return fail("commit_timeout_ms must be > 0".into());
        }
        if self.adapt_every == 0 || self.history_len == 0 {
            return fail("adapt_every and history_len must be >= 1".into());
        }
        if let Some(n) = self.initial_batch_size {
            if !(self.min_batch_size..=self.max_operations_per_batch).contains(&n) {
                return fail(format!("initial_batch_size {n} outside batch size bounds"));
            }
        }
        if let Some(n) = self.initial_concurrency {
            if !(self.min_concurrency..=self.max_concurrent_batches).contains(&n) {
                return fail(format!("initial_concurrency {n} outside concurrency bounds"));
            }
        }
        self.thresholds.validate()
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.commit_retry_base_delay_ms),
            self.commit_timeout(),
        )
    }

    pub fn initial_batch_size(&self) -> usize {
        self.initial_batch_size
            .unwrap_or(self.max_operations_per_batch)
    }

    pub fn initial_concurrency(&self) -> usize {
        self.initial_concurrency
            .unwrap_or(self.max_concurrent_batches)
    }
}

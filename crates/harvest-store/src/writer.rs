//! Adaptive bulk writer
//!
//! Operations are queued synchronously and drained by [`AdaptiveBulkWriter::commit`],
//! which partitions the queue using the current [`Tuning`], commits sub-batches
//! concurrently under a hard timeout, spills payloads of failed sub-batches to
//! [`FallbackStore`] and feeds the outcome back into the [`AdaptiveTuner`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use harvest_core::{Backoff, HarvestError, execute_with_retry};
use rustc_hash::FxHashSet;
use tokio::time::Instant;

use crate::adaptive::{AdaptiveTuner, NetworkTier, PerformanceSample, Tuning};
use crate::batch::{SubBatch, partition};
use crate::config::WriterConfig;
use crate::fallback::FallbackStore;
use crate::operation::WriteOperation;
use crate::store::DocumentStore;

/// Outcome of one commit cycle.
#[derive(Debug, Clone)]
pub struct CommitReport {
    pub succeeded: usize,
    pub failed: usize,
    pub sub_batches: usize,
    /// Sub-batches that failed with a timeout-class error
    pub timeouts: usize,
    /// Payloads written to fallback storage
    pub spilled: usize,
    pub duration: Duration,
    pub ops_per_second: f64,
    /// Tier after this cycle's adaptation, if any has run yet
    pub tier: Option<NetworkTier>,
    /// Batch size used for this cycle
    pub batch_size: usize,
    /// Concurrency used for this cycle
    pub concurrency: usize,
}

impl CommitReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Totals for one logical unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub duration: Duration,
}

impl RunSummary {
    pub fn empty() -> Self {
        Self {
            succeeded: 0,
            failed: 0,
            total: 0,
            duration: Duration::ZERO,
        }
    }

    pub fn log(&self) {
        log::info!("=== Write Summary ===");
        log::info!(
            "Operations: {}/{} succeeded ({} failed)",
            self.succeeded,
            self.total,
            self.failed
        );
        log::info!("Time: {:.1}s", self.duration.as_secs_f64());
        if self.total > 0 && !self.duration.is_zero() {
            let ops_per_sec = self.total as f64 / self.duration.as_secs_f64();
            log::info!("Throughput: {:.0} ops/sec", ops_per_sec);
        }
    }
}

#[derive(Debug, Default)]
struct Totals {
    succeeded: usize,
    failed: usize,
}

pub struct AdaptiveBulkWriter {
    config: WriterConfig,
    store: Arc<dyn DocumentStore>,
    fallback: FallbackStore,
    backoff: Backoff,
    queue: Vec<WriteOperation>,
    tuner: AdaptiveTuner,
    totals: Totals,
    started: Instant,
}

impl AdaptiveBulkWriter {
    /// Validate `config` and open its fallback directory.
    pub fn new(config: WriterConfig, store: Arc<dyn DocumentStore>) -> Result<Self, HarvestError> {
        config.validate()?;
        let fallback = FallbackStore::new(&config.fallback_dir)?;
        log::debug!(
            "bulk writer: batch {} (max {}, {} bytes), concurrency {}, timeout {:?}, fallback {}",
            config.initial_batch_size(),
            config.max_operations_per_batch,
            config.max_batch_bytes,
            config.initial_concurrency(),
            config.commit_timeout(),
            config.fallback_dir.display()
        );
        Ok(Self {
            tuner: AdaptiveTuner::new(&config),
            backoff: config.backoff(),
            config,
            store,
            fallback,
            queue: Vec::new(),
            totals: Totals::default(),
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn fallback(&self) -> &FallbackStore {
        &self.fallback
    }

    /// Queue an operation. Never performs I/O.
    ///
    /// Payloads above the document ceiling are rejected here, before anything
    /// is sent.
    pub fn enqueue(&mut self, op: WriteOperation) -> Result<(), HarvestError> {
        op.validate(self.config.max_document_bytes)?;
        self.queue.push(op);
        Ok(())
    }

    /// Operations waiting for the next commit
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn tuning(&self) -> Tuning {
        self.tuner.tuning()
    }

    pub fn tier(&self) -> Option<NetworkTier> {
        self.tuner.tier()
    }

    /// Totals since construction or the last [`reset`](Self::reset).
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            succeeded: self.totals.succeeded,
            failed: self.totals.failed,
            total: self.totals.succeeded + self.totals.failed,
            duration: self.started.elapsed(),
        }
    }

    /// Drain the queue. Failures are counted and spilled, never returned.
    pub async fn commit(&mut self) -> CommitReport {
        let start = Instant::now();
        let tuning = self.tuner.tuning();
        let ops = std::mem::take(&mut self.queue);
        if ops.is_empty() {
            return CommitReport {
                succeeded: 0,
                failed: 0,
                sub_batches: 0,
                timeouts: 0,
                spilled: 0,
                duration: Duration::ZERO,
                ops_per_second: 0.0,
                tier: self.tuner.tier(),
                batch_size: tuning.batch_size,
                concurrency: tuning.concurrency,
            };
        }

        let total = ops.len();
        let batches = partition(ops, tuning.batch_size, self.config.max_batch_bytes);
        let sub_batches = batches.len();
        log::debug!(
            "committing {total} ops in {sub_batches} sub-batches (batch {}, concurrency {})",
            tuning.batch_size,
            tuning.concurrency
        );

        let outcomes: Vec<(SubBatch, Result<(), HarvestError>)> = {
            let store = &self.store;
            let timeout = self.config.commit_timeout();
            let attempts = self.config.commit_retry_attempts;
            let backoff = self.backoff;
            stream::iter(batches)
                .map(|batch| async move {
                    let label = format!("sub-batch {}", batch.index);
                    let result = execute_with_retry(&label, attempts, &backoff, || {
                        let ops = &batch.ops;
                        async move {
                            match tokio::time::timeout(timeout, store.commit(ops)).await {
                                Ok(r) => r,
                                Err(_) => Err(HarvestError::CommitTimeout { after: timeout }),
                            }
                        }
                    })
                    .await;
                    (batch, result)
                })
                .buffer_unordered(tuning.concurrency.max(1))
                .collect()
                .await
        };

        let mut succeeded = 0;
        let mut failed = 0;
        let mut timeouts = 0;
        let mut spilled = 0;
        let mut replayed = 0;
        for (batch, result) in outcomes {
            match result {
                Ok(()) => {
                    succeeded += batch.len();
                    for origin in batch.ops.iter().filter_map(|op| op.origin.as_ref()) {
                        match self.fallback.remove(origin) {
                            Ok(()) => replayed += 1,
                            Err(e) => log::warn!("replayed but not removed: {e}"),
                        }
                    }
                }
                Err(e) => {
                    if e.is_timeout() {
                        timeouts += 1;
                    }
                    log::warn!(
                        "sub-batch {} ({} ops, {} bytes) failed: {e}",
                        batch.index,
                        batch.len(),
                        batch.bytes
                    );
                    spilled += self.spill(&batch, &e);
                    failed += batch.len();
                }
            }
        }
        if replayed > 0 {
            log::info!("replayed {replayed} fallback payloads");
            if let Err(e) = self.fallback.compact_manifest() {
                log::warn!("fallback manifest not compacted: {e}");
            }
        }

        let duration = start.elapsed();
        if timeouts > 0 {
            self.tuner.emergency();
        }
        let sample = PerformanceSample::new(succeeded, failed, sub_batches, timeouts, duration);
        let ops_per_second = sample.ops_per_second;
        self.tuner.record(sample);

        self.totals.succeeded += succeeded;
        self.totals.failed += failed;

        log::info!(
            "commit: {succeeded}/{total} ok in {:.2}s ({ops_per_second:.0} ops/s), {failed} failed, {spilled} spilled",
            duration.as_secs_f64()
        );

        CommitReport {
            succeeded,
            failed,
            sub_batches,
            timeouts,
            spilled,
            duration,
            ops_per_second,
            tier: self.tuner.tier(),
            batch_size: tuning.batch_size,
            concurrency: tuning.concurrency,
        }
    }

    /// Persist payload-bearing operations of a failed sub-batch. Returns the
    /// number of files written.
    fn spill(&self, batch: &SubBatch, error: &HarvestError) -> usize {
        let mut written = 0;
        for op in &batch.ops {
            // Replayed operations already have their file on disk
            if op.origin.is_some() {
                continue;
            }
            match self.fallback.spill(op, error) {
                Ok(Some(_)) => written += 1,
                Ok(None) => {}
                Err(e) => log::error!("{}: payload lost, could not spill: {e}", op.path()),
            }
        }
        written
    }

    /// Queue every spilled payload for the next commit. Files are removed once
    /// their sub-batch commits. Returns the number of operations queued.
    pub fn replay_fallback(&mut self) -> Result<usize, HarvestError> {
        let queued: FxHashSet<PathBuf> = self
            .queue
            .iter()
            .filter_map(|op| op.origin.clone())
            .collect();
        let mut count = 0;
        for record in self.fallback.list()? {
            if queued.contains(&self.fallback.dir().join(&record.file)) {
                continue;
            }
            match self.fallback.load(&record) {
                Ok(op) => {
                    self.enqueue(op)?;
                    count += 1;
                }
                Err(e) => log::warn!("skipping fallback file {}: {e}", record.file),
            }
        }
        if count > 0 {
            log::info!(
                "queued {count} fallback payloads from {}",
                self.fallback.dir().display()
            );
        }
        Ok(count)
    }

    /// Close the current unit of work: drop queued operations and performance
    /// history and start fresh totals. The adapted tuning carries over.
    pub fn reset(&mut self) -> RunSummary {
        let summary = self.summary();
        if !self.queue.is_empty() {
            log::warn!("reset discards {} uncommitted operations", self.queue.len());
            self.queue.clear();
        }
        self.tuner.clear_history();
        self.totals = Totals::default();
        self.started = Instant::now();
        summary
    }
}

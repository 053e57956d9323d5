//! Harvest Store - adaptive bulk writes against a path-addressed document store
//!
//! Write operations are queued, committed in count- and byte-bounded
//! sub-batches, and payloads of failed sub-batches are spilled to local
//! fallback storage for replay. Batch size and concurrency follow the
//! observed network stability.

pub mod adaptive;
pub mod batch;
pub mod config;
pub mod fallback;
pub mod memory;
pub mod operation;
pub mod store;
pub mod writer;

// Re-exports for convenience
pub use adaptive::{AdaptiveTuner, NetworkTier, PerformanceSample, StabilityThresholds, Tuning};
pub use batch::{SubBatch, partition};
pub use config::WriterConfig;
pub use fallback::{FallbackRecord, FallbackStore};
pub use memory::MemoryStore;
pub use operation::{DocPath, WriteKind, WriteOperation};
pub use store::DocumentStore;
pub use writer::{AdaptiveBulkWriter, CommitReport, RunSummary};

//! Harvest Core - shared infrastructure for the acquisition pipeline
//!
//! Error taxonomy, jittered exponential backoff and logging setup used by the
//! HTTP client, the bulk writer and the CLI.

pub mod backoff;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use backoff::{Backoff, execute_with_retry};
pub use error::HarvestError;
pub use logging::init_logging;

//! Document store seam

use async_trait::async_trait;
use harvest_core::HarvestError;

use crate::operation::WriteOperation;

/// Path-addressed document store accepting atomic multi-operation commits.
///
/// A commit either applies every operation in `ops` or none of them. There is
/// no atomicity across separate commits. When individual operations are
/// rejected, implementations report [`HarvestError::PartialBatchFailure`] with
/// the rejected count; nothing from the commit is applied.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn commit(&self, ops: &[WriteOperation]) -> Result<(), HarvestError>;
}

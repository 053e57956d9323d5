//! Partitioning of queued operations into bounded sub-batches

use crate::operation::WriteOperation;

/// Operations committed together; atomic within itself only.
#[derive(Debug)]
pub struct SubBatch {
    pub index: usize,
    pub ops: Vec<WriteOperation>,
    /// Sum of serialized payload sizes
    pub bytes: usize,
}

impl SubBatch {
    fn new(index: usize) -> Self {
        Self {
            index,
            ops: Vec::new(),
            bytes: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Greedily split `ops`, preserving order, so that no sub-batch holds more than
/// `max_ops` operations or more than `max_bytes` of payload.
///
/// Callers validate each operation against a document ceiling that is at most
/// `max_bytes`, so a single operation always fits.
pub fn partition(ops: Vec<WriteOperation>, max_ops: usize, max_bytes: usize) -> Vec<SubBatch> {
    let max_ops = max_ops.max(1);
    let mut batches = Vec::new();
    let mut current = SubBatch::new(0);

    for op in ops {
        let size = op.encoded_len();
        debug_assert!(size <= max_bytes, "operation larger than batch byte ceiling");
        let full = current.len() >= max_ops;
        let overflow = !current.is_empty() && current.bytes + size > max_bytes;
        if full || overflow {
            let next = SubBatch::new(current.index + 1);
            batches.push(std::mem::replace(&mut current, next));
        }
        current.bytes += size;
        current.ops.push(op);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

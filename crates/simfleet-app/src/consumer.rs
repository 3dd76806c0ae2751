//! Index consumption policies
//!
//! A consumer decides how many logical iterations every index of a batch
//! satisfies. It multiplies the tuples handed out per batch without moving
//! batch boundaries.

use simfleet_core::BatchIndices;

pub trait IndexConsumer: Send + Sync {
    /// Repetitions for each index of `batch`; values below 1 count as 1
    fn consume_count(&self, batch: &BatchIndices) -> usize;
}

/// Every index runs once
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeOnce;

impl IndexConsumer for ConsumeOnce {
    fn consume_count(&self, _batch: &BatchIndices) -> usize {
        1
    }
}

/// Every index runs `n` times on its engine before the batch ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeTimes(pub usize);

impl IndexConsumer for ConsumeTimes {
    fn consume_count(&self, _batch: &BatchIndices) -> usize {
        self.0.max(1)
    }
}

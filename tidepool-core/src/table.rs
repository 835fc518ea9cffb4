//! Contract of an in-process replay table.
use crate::chunk::ChunkData;
use crate::error::Result;
use crate::trajectory::FlatTrajectory;
use std::sync::Arc;
use std::time::Duration;

/// One item drawn from a table, together with shared references to the
/// chunks its trajectory is assembled from.
#[derive(Clone, Debug)]
pub struct SampledItem {
    pub key: u64,
    pub probability: f64,
    pub table_size: i64,
    pub priority: f64,
    pub trajectory: FlatTrajectory,
    pub chunks: Vec<Arc<ChunkData>>,
}

/// The sampling surface of a replay table, as consumed by the client.
///
/// A flexible batch may span multiple logical samples under one lock
/// acquisition; `batch_size` caps it. When the rate limiter does not release
/// any item before `timeout`, the call fails with
/// [`DeadlineExceeded`](crate::TidepoolError::DeadlineExceeded).
pub trait ReplayTable: Send + Sync {
    fn sample_flexible_batch(
        &self,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<Vec<SampledItem>>;

    /// Batch size used when the sampler does not specify one.
    fn default_flexible_batch_size(&self) -> usize;

    fn name(&self) -> &str;
}

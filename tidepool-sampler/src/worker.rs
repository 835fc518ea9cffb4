//! Workers pulling raw samples from a source and feeding the shared queue.
mod local;
mod stream;
pub use local::LocalSamplerWorker;
pub use stream::{SampleStream, SampleStreamClient, StreamContext, StreamSamplerWorker};

use crate::queue::SampleQueue;
use crate::sample::Sample;
use std::time::Duration;
use tidepool_core::error::Result;

/// Samples delivered plus the terminal status of one fetch call.
pub type FetchOutcome = (u64, Result<()>);

/// The contract between the sampler's dispatch loop and a worker.
///
/// Both transports implement it: one session of fetching a fixed number of
/// samples, and an out-of-band cancel that aborts the current and all
/// future sessions.
pub trait SamplerWorker: Send + Sync {
    /// Obtains up to `num_samples` samples from the worker's source,
    /// reassembles them and pushes each one to `queue`.
    ///
    /// Returns the number of samples pushed together with the terminal
    /// status. Delivering fewer than `num_samples` always comes with a
    /// non-OK status; the dispatch loop re-offers the unfulfilled quota.
    fn fetch_samples(
        &self,
        queue: &SampleQueue<Sample>,
        num_samples: u64,
        rate_limiter_timeout: Duration,
    ) -> FetchOutcome;

    /// Aborts the in-flight fetch, if any. Future fetches fail with
    /// [`Cancelled`](tidepool_core::TidepoolError::Cancelled).
    fn cancel(&self);
}

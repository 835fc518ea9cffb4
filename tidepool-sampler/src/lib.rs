//! Concurrent sampling client for tidepool replay tables.
//!
//! A [`Sampler`] runs a pool of worker threads that pre-fetch sampled
//! trajectories from a replay table, reassemble their chunked payloads and
//! hand whole [`Sample`]s to a single consumer over a bounded queue:
//!
//! ```text
//!   source (stream | table) -> worker -> reassembly -> queue -> consumer
//! ```
//!
//! The code might look like below.
//!
//! ```ignore
//! fn drain(table: Arc<dyn ReplayTable>) -> tidepool_core::Result<()> {
//!     let config = SamplerConfig::default()
//!         .max_samples(1000)
//!         .num_workers(2);
//!     let mut sampler = Sampler::new_local(table, &config, None)?;
//!
//!     loop {
//!         match sampler.get_next_sample() {
//!             Ok(data) => consume(data),
//!             Err(err) if err.is_out_of_range() => break, // all samples drawn
//!             Err(err) => return Err(err),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Two transports share the worker contract: [`StreamSamplerWorker`] drives
//! a bidirectional sample stream to a remote table through the
//! [`SampleStreamClient`] seam, while [`LocalSamplerWorker`] samples an
//! in-process [`ReplayTable`](tidepool_core::ReplayTable) directly. Workers
//! honour the global sample cap through the sampler's dispatch loop, which
//! parcels the budget out per fetch session and reclaims whatever a broken
//! session leaves unfulfilled.
//!
//! Consumers choose the emission granularity per call:
//! [`Sampler::get_next_timestep`], [`Sampler::get_next_sample`] (batched
//! timesteps) or [`Sampler::get_next_trajectory`].
mod queue;
mod reassembly;
mod sample;
mod sampler;
mod worker;

pub use queue::SampleQueue;
pub use reassembly::{sample_from_item, sample_from_responses};
pub use sample::{Sample, NUM_HEADER_TENSORS};
pub use sampler::{
    CloseHandle, Sampler, SamplerConfig, DEFAULT_MAX_IN_FLIGHT_SAMPLES_PER_WORKER,
    DEFAULT_MAX_SAMPLES_PER_STREAM, DEFAULT_NUM_WORKERS,
};
pub use worker::{
    FetchOutcome, LocalSamplerWorker, SampleStream, SampleStreamClient, SamplerWorker,
    StreamContext, StreamSamplerWorker,
};

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{info, warn};
use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::tensor::{Tensor, TensorSpec};
use tidepool_core::ReplayTable;

use crate::queue::SampleQueue;
use crate::sample::{Sample, NUM_HEADER_TENSORS};
use crate::sampler::SamplerConfig;
use crate::worker::{
    LocalSamplerWorker, SampleStreamClient, SamplerWorker, StreamSamplerWorker,
};

/// Which consumer call a returned vector is validated for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ValidationMode {
    Timestep,
    BatchedTimestep,
    Trajectory,
}

struct DispatchState {
    /// Samples handed out to worker sessions, fulfilled or in flight.
    requested: u64,

    /// Samples delivered to the consumer.
    returned: u64,

    /// Set by [`Sampler::close`].
    closed: bool,

    /// First fatal worker error observed; later errors are dropped.
    worker_status: Result<()>,
}

struct Shared {
    queue: SampleQueue<Sample>,
    state: Mutex<DispatchState>,
    dispatch_cv: Condvar,
    max_samples: u64,
    max_samples_per_stream: u64,
    rate_limiter_timeout: Duration,
}

impl Shared {
    fn should_stop_workers(&self, state: &DispatchState) -> bool {
        state.closed || state.returned == self.max_samples || state.worker_status.is_err()
    }

    /// Flags the sampler closed, cancels the workers and unblocks both
    /// sides of the queue. Returns false when already closed. Joining the
    /// worker threads stays with the owning [`Sampler`].
    fn begin_close(&self, workers: &[Arc<dyn SamplerWorker>]) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return false;
            }
            state.closed = true;
            self.dispatch_cv.notify_all();
        }
        for worker in workers {
            worker.cancel();
        }
        self.queue.close();
        true
    }

    /// Body of one worker thread: claim a slice of the sample budget, run a
    /// fetch session, account for what actually arrived, repeat.
    fn run_worker(&self, worker: &dyn SamplerWorker) {
        loop {
            let mut state = self.state.lock().unwrap();
            loop {
                if self.should_stop_workers(&state) {
                    return;
                }
                if state.requested < self.max_samples {
                    break;
                }
                state = self.dispatch_cv.wait(state).unwrap();
            }
            let batch = self
                .max_samples_per_stream
                .min(self.max_samples - state.requested);
            state.requested += batch;
            drop(state);

            let (delivered, status) =
                worker.fetch_samples(&self.queue, batch, self.rate_limiter_timeout);

            let mut state = self.state.lock().unwrap();
            // A session that ended early gives its unfulfilled quota back to
            // the pool.
            state.requested -= batch - delivered;
            self.dispatch_cv.notify_all();

            if let Err(err) = status {
                if !err.is_unavailable() {
                    if state.worker_status.is_ok() {
                        warn!("sampler worker failed: {}", err);
                        state.worker_status = Err(err);
                        // Unblock a consumer waiting on the queue.
                        self.queue.close();
                    }
                    return;
                }
                info!("transient sampler worker error, will reopen: {}", err);
            }
        }
    }
}

/// Concurrently pulls samples from a replay table and hands them to a single
/// consumer as timesteps, batched timesteps or whole trajectories.
///
/// Worker threads fetch in the background and block once the internal queue
/// is full, so at most roughly `queue capacity + workers * max in flight`
/// samples exist at a time. The sampler closes itself on drop; consumer
/// calls made after [`close`](Sampler::close) (or after the sample cap was
/// delivered) fail with the corresponding status.
pub struct Sampler {
    table_name: String,
    shared: Arc<Shared>,
    workers: Vec<Arc<dyn SamplerWorker>>,
    threads: Vec<JoinHandle<()>>,
    active_sample: Option<Sample>,
    signature: Option<Vec<TensorSpec>>,
}

impl Sampler {
    /// Builds a sampler streaming from a remote table via `client`.
    pub fn new_remote(
        client: Arc<dyn SampleStreamClient>,
        table_name: impl Into<String>,
        config: &SamplerConfig,
        signature: Option<Vec<TensorSpec>>,
    ) -> Result<Self> {
        config.validate()?;
        let table_name = table_name.into();
        let workers: Vec<Arc<dyn SamplerWorker>> = (0..config.effective_num_workers())
            .map(|_| {
                Arc::new(StreamSamplerWorker::new(
                    client.clone(),
                    table_name.clone(),
                    config.max_in_flight_samples_per_worker as u64,
                    config.flexible_batch_size,
                )) as Arc<dyn SamplerWorker>
            })
            .collect();
        Self::with_workers(workers, table_name, config, signature)
    }

    /// Builds a sampler reading an in-process table directly.
    pub fn new_local(
        table: Arc<dyn ReplayTable>,
        config: &SamplerConfig,
        signature: Option<Vec<TensorSpec>>,
    ) -> Result<Self> {
        config.validate()?;
        let table_name = table.name().to_string();
        // Local workers never send a request message, so the in-flight cap
        // applies through the batch size: a worker only asks for a new
        // flexible batch once the previous one has been pushed out.
        let flexible_batch_size = config
            .flexible_batch_size
            .unwrap_or_else(|| table.default_flexible_batch_size())
            .min(config.max_in_flight_samples_per_worker);
        let workers: Vec<Arc<dyn SamplerWorker>> = (0..config.effective_num_workers())
            .map(|_| {
                Arc::new(LocalSamplerWorker::new(table.clone(), flexible_batch_size))
                    as Arc<dyn SamplerWorker>
            })
            .collect();
        Self::with_workers(workers, table_name, config, signature)
    }

    /// Builds a sampler around externally constructed workers.
    pub fn with_workers(
        workers: Vec<Arc<dyn SamplerWorker>>,
        table_name: impl Into<String>,
        config: &SamplerConfig,
        signature: Option<Vec<TensorSpec>>,
    ) -> Result<Self> {
        config.validate()?;
        let table_name = table_name.into();
        let shared = Arc::new(Shared {
            queue: SampleQueue::new(config.queue_capacity()),
            state: Mutex::new(DispatchState {
                requested: 0,
                returned: 0,
                closed: false,
                worker_status: Ok(()),
            }),
            dispatch_cv: Condvar::new(),
            max_samples: config.effective_max_samples(),
            max_samples_per_stream: config.effective_max_samples_per_stream(),
            rate_limiter_timeout: config.rate_limiter_timeout,
        });

        let mut threads = Vec::with_capacity(workers.len());
        for (i, worker) in workers.iter().enumerate() {
            let shared = shared.clone();
            let worker = worker.clone();
            let handle = thread::Builder::new()
                .name(format!("sampler-worker-{}", i))
                .spawn(move || shared.run_worker(worker.as_ref()))
                .map_err(|e| {
                    TidepoolError::Internal(format!("failed to spawn worker thread: {}", e))
                })?;
            threads.push(handle);
        }
        info!(
            "sampler for table {} running {} workers",
            table_name,
            workers.len()
        );

        Ok(Self {
            table_name,
            shared,
            workers,
            threads,
            active_sample: None,
            signature,
        })
    }

    /// Number of worker threads backing this sampler.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Emits the next timestep of the active sample, popping a fresh sample
    /// first when necessary. The second element of the pair is true when
    /// this timestep was the sample's last.
    pub fn get_next_timestep(&mut self) -> Result<(Vec<Tensor>, bool)> {
        self.maybe_sample_next()?;
        let Some(sample) = self.active_sample.as_mut() else {
            return Err(TidepoolError::Internal("no active sample".into()));
        };
        if !sample.is_composed_of_timesteps() {
            return Err(TidepoolError::InvalidArgument(
                "sampled trajectory cannot be decomposed into timesteps".into(),
            ));
        }

        let data = sample.next_timestep()?;
        self.validate_against_signature(&data, ValidationMode::Timestep)?;

        let end_of_sample = self
            .active_sample
            .as_ref()
            .map_or(true, |s| s.is_end_of_sample());
        if end_of_sample {
            self.increment_returned();
        }
        Ok((data, end_of_sample))
    }

    /// Pops a whole sample and emits it as batched timesteps.
    pub fn get_next_sample(&mut self) -> Result<Vec<Tensor>> {
        let mut sample = self.pop_next_sample()?;
        let data = sample.as_batched_timesteps()?;
        self.validate_against_signature(&data, ValidationMode::BatchedTimestep)?;
        self.increment_returned();
        Ok(data)
    }

    /// Pops a whole sample and emits it as a trajectory.
    pub fn get_next_trajectory(&mut self) -> Result<Vec<Tensor>> {
        let mut sample = self.pop_next_sample()?;
        let data = sample.as_trajectory()?;
        self.validate_against_signature(&data, ValidationMode::Trajectory)?;
        self.increment_returned();
        Ok(data)
    }

    /// Stops all workers and joins their threads. Idempotent.
    pub fn close(&mut self) {
        if self.shared.begin_close(&self.workers) {
            info!("closing sampler for table {}", self.table_name);
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }

    /// A handle for closing this sampler from another thread, e.g. while
    /// the owning thread is blocked in a consumer call (which then returns
    /// [`Cancelled`](TidepoolError::Cancelled)).
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            shared: self.shared.clone(),
            workers: self.workers.clone(),
        }
    }

    fn maybe_sample_next(&mut self) -> Result<()> {
        if let Some(sample) = &self.active_sample {
            if !sample.is_end_of_sample() {
                return Ok(());
            }
        }
        self.active_sample = Some(self.pop_next_sample()?);
        Ok(())
    }

    /// Blocking pop. Once the queue is closed and drained, reports the most
    /// specific termination cause: the cap, user cancellation, or the first
    /// fatal worker error.
    fn pop_next_sample(&self) -> Result<Sample> {
        if let Some(sample) = self.shared.queue.pop() {
            return Ok(sample);
        }

        let state = self.shared.state.lock().unwrap();
        if state.returned == self.shared.max_samples {
            return Err(TidepoolError::OutOfRange(
                "all samples permitted by max_samples were returned".into(),
            ));
        }
        if state.closed {
            return Err(TidepoolError::Cancelled("sampler has been closed".into()));
        }
        match &state.worker_status {
            Err(err) => Err(err.clone()),
            Ok(()) => Err(TidepoolError::Internal(
                "sample queue closed without a recorded cause".into(),
            )),
        }
    }

    fn increment_returned(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.returned += 1;
        if state.returned == self.shared.max_samples {
            self.shared.queue.close();
            self.shared.dispatch_cv.notify_all();
        }
    }

    fn validate_against_signature(
        &self,
        data: &[Tensor],
        mode: ValidationMode,
    ) -> Result<()> {
        let Some(specs) = &self.signature else {
            return Ok(());
        };

        if data.len() != specs.len() {
            return Err(TidepoolError::InvalidArgument(format!(
                "inconsistent number of tensors received from table '{}': signature has {} \
                 tensors but the data shows {}",
                self.table_name,
                specs.len(),
                data.len()
            )));
        }

        // The four header tensors are synthesised by this client and are
        // never checked against the signature.
        for i in NUM_HEADER_TENSORS..data.len() {
            let tensor = &data[i];
            let spec = &specs[i];

            let stripped;
            let shape: &[usize] = match mode {
                ValidationMode::BatchedTimestep => {
                    let full = tensor.shape();
                    if full.is_empty() {
                        return Err(TidepoolError::InvalidArgument(format!(
                            "invalid tensor shape received from table '{}': data[{}] is a \
                             scalar and has no time dimension",
                            self.table_name, i
                        )));
                    }
                    stripped = full[1..].to_vec();
                    &stripped
                }
                ValidationMode::Timestep | ValidationMode::Trajectory => tensor.shape(),
            };

            if tensor.dtype() != spec.dtype || !spec.shape.is_compatible_with(shape) {
                return Err(TidepoolError::InvalidArgument(format!(
                    "received incompatible tensor at flattened index {} from table '{}': \
                     signature has ({}, {}), tensor has ({}, {:?})",
                    i,
                    self.table_name,
                    spec.dtype,
                    spec.shape,
                    tensor.dtype(),
                    shape
                )));
            }
        }
        Ok(())
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.close();
    }
}

/// See [`Sampler::close_handle`].
pub struct CloseHandle {
    shared: Arc<Shared>,
    workers: Vec<Arc<dyn SamplerWorker>>,
}

impl CloseHandle {
    /// Cancels the workers and unblocks producers and the consumer.
    pub fn close(&self) {
        self.shared.begin_close(&self.workers);
    }
}

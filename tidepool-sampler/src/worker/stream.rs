//! Worker streaming samples from a remote table over a bidirectional
//! sample stream.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::trace;
use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::wire::{sample_is_done, SampleStreamRequest, SampleStreamResponse};

use crate::queue::SampleQueue;
use crate::reassembly::sample_from_responses;
use crate::sample::Sample;
use crate::worker::{FetchOutcome, SamplerWorker};

/// Cancellation handle shared between a worker and its open stream.
///
/// The transport implementation is expected to observe it and fail the
/// stream's blocking reads and writes promptly once it flips.
#[derive(Debug, Default)]
pub struct StreamContext {
    cancelled: AtomicBool,
}

impl StreamContext {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One open bidirectional sample stream.
pub trait SampleStream: Send {
    /// Sends one request. Returns `false` when the stream is broken; the
    /// terminal status is then available from [`finish`](Self::finish).
    fn write(&mut self, request: &SampleStreamRequest) -> bool;

    /// Reads the next response, or `None` once the stream has ended.
    fn read(&mut self) -> Option<SampleStreamResponse>;

    /// Terminal status of a broken or server-closed stream.
    fn finish(&mut self) -> Result<()>;
}

/// Factory for sample streams; the engine's only view of the transport.
pub trait SampleStreamClient: Send + Sync {
    fn open_stream(&self, context: Arc<StreamContext>) -> Result<Box<dyn SampleStream>>;
}

struct StreamState {
    closed: bool,
    context: Option<Arc<StreamContext>>,
}

/// Fetches samples by opening one stream per session and interleaving
/// batched requests with response reads.
pub struct StreamSamplerWorker {
    client: Arc<dyn SampleStreamClient>,
    table_name: String,

    /// Largest `num_samples` put on a single request.
    samples_per_request: u64,

    /// Forwarded to the server; `None` leaves the choice to it.
    flexible_batch_size: Option<usize>,

    state: Mutex<StreamState>,
}

impl StreamSamplerWorker {
    pub fn new(
        client: Arc<dyn SampleStreamClient>,
        table_name: impl Into<String>,
        samples_per_request: u64,
        flexible_batch_size: Option<usize>,
    ) -> Self {
        Self {
            client,
            table_name: table_name.into(),
            samples_per_request,
            flexible_batch_size,
            state: Mutex::new(StreamState {
                closed: false,
                context: None,
            }),
        }
    }

    fn broken_stream_status(stream: &mut dyn SampleStream) -> TidepoolError {
        match stream.finish() {
            Err(err) => err,
            // The server half-closed cleanly while we were still owed
            // samples. Treat it as transient so the next dispatch reopens.
            Ok(()) => TidepoolError::Unavailable("sample stream closed by the server".into()),
        }
    }
}

impl SamplerWorker for StreamSamplerWorker {
    fn fetch_samples(
        &self,
        queue: &SampleQueue<Sample>,
        num_samples: u64,
        rate_limiter_timeout: Duration,
    ) -> FetchOutcome {
        let mut stream = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return (
                    0,
                    Err(TidepoolError::Cancelled("sampler has been closed".into())),
                );
            }
            let context = Arc::new(StreamContext::default());
            let stream = match self.client.open_stream(context.clone()) {
                Ok(stream) => stream,
                Err(err) => return (0, Err(err)),
            };
            state.context = Some(context);
            stream
        };

        let rate_limiter_timeout_ms = rate_limiter_timeout.as_millis().min(u64::MAX as u128) as u64;
        let mut delivered: u64 = 0;
        while delivered < num_samples {
            let request = SampleStreamRequest {
                table: self.table_name.clone(),
                num_samples: self.samples_per_request.min(num_samples - delivered),
                rate_limiter_timeout_ms,
                flexible_batch_size: self.flexible_batch_size,
            };
            if !stream.write(&request) {
                return (delivered, Err(Self::broken_stream_status(stream.as_mut())));
            }
            trace!(
                "requested {} samples from table {}",
                request.num_samples,
                self.table_name
            );

            for _ in 0..request.num_samples {
                let mut responses: Vec<SampleStreamResponse> = Vec::new();
                while !sample_is_done(&responses) {
                    match stream.read() {
                        Some(response) => responses.push(response),
                        None => {
                            return (delivered, Err(Self::broken_stream_status(stream.as_mut())))
                        }
                    }
                }

                let sample = match sample_from_responses(responses) {
                    Ok(sample) => sample,
                    Err(err) => return (delivered, Err(err)),
                };
                if !queue.push(sample) {
                    return (
                        delivered,
                        Err(TidepoolError::Cancelled("sampler has been closed".into())),
                    );
                }
                delivered += 1;
            }
        }

        (delivered, Ok(()))
    }

    fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        if let Some(context) = &state.context {
            context.cancel();
        }
    }
}

//! Worker sampling an in-process replay table.
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::trace;
use tidepool_core::error::TidepoolError;
use tidepool_core::ReplayTable;

use crate::queue::SampleQueue;
use crate::reassembly::sample_from_item;
use crate::sample::Sample;
use crate::worker::{FetchOutcome, SamplerWorker};

/// Upper bound on a single blocking table call. The caller-supplied rate
/// limiter timeout may be arbitrarily long; waking at this period lets the
/// worker observe cancellation in bounded time.
const WAKEUP_PERIOD: Duration = Duration::from_secs(3);

/// Fetches samples straight off a table living in the same process.
pub struct LocalSamplerWorker {
    table: Arc<dyn ReplayTable>,

    /// Cap on items drawn under a single table lock acquisition. Also
    /// bounds this worker's in-flight samples, since a new batch is only
    /// requested once the previous one has been pushed out.
    flexible_batch_size: usize,

    closed: Mutex<bool>,
}

impl LocalSamplerWorker {
    pub fn new(table: Arc<dyn ReplayTable>, flexible_batch_size: usize) -> Self {
        Self {
            table,
            flexible_batch_size: flexible_batch_size.max(1),
            closed: Mutex::new(false),
        }
    }
}

impl SamplerWorker for LocalSamplerWorker {
    fn fetch_samples(
        &self,
        queue: &SampleQueue<Sample>,
        num_samples: u64,
        rate_limiter_timeout: Duration,
    ) -> FetchOutcome {
        let final_deadline = Instant::now().checked_add(rate_limiter_timeout);

        let mut delivered: u64 = 0;
        while delivered < num_samples {
            if *self.closed.lock().unwrap() {
                return (
                    delivered,
                    Err(TidepoolError::Cancelled("sampler has been closed".into())),
                );
            }

            let timeout = match final_deadline {
                Some(deadline) => WAKEUP_PERIOD.min(deadline.saturating_duration_since(Instant::now())),
                None => WAKEUP_PERIOD,
            };
            let batch_size = self
                .flexible_batch_size
                .min((num_samples - delivered) as usize);

            let items = match self.table.sample_flexible_batch(batch_size, timeout) {
                // Waking up before the real deadline only serves the
                // cancellation check above; keep waiting.
                Err(err)
                    if err.is_deadline_exceeded()
                        && final_deadline.map_or(true, |d| Instant::now() < d) =>
                {
                    continue;
                }
                Err(err) => return (delivered, Err(err)),
                Ok(items) => items,
            };
            trace!(
                "sampled {} items from table {}",
                items.len(),
                self.table.name()
            );

            for item in &items {
                let sample = match sample_from_item(item) {
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
        *self.closed.lock().unwrap() = true;
    }
}

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
    time::Duration,
};
use tidepool_core::error::TidepoolError;

/// Worker count used when [`SamplerConfig::num_workers`] is `None`.
pub const DEFAULT_NUM_WORKERS: usize = 2;

/// Samples fetched per worker session when
/// [`SamplerConfig::max_samples_per_stream`] is left at its default.
pub const DEFAULT_MAX_SAMPLES_PER_STREAM: u64 = 100;

/// Default cap on the samples a single request may put in flight.
pub const DEFAULT_MAX_IN_FLIGHT_SAMPLES_PER_WORKER: usize = 100;

// Effectively no deadline: consumers wait for data unless they opt into a
// shorter rate limiter timeout.
const DEFAULT_RATE_LIMITER_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// Configuration of a [`Sampler`](crate::Sampler).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Total number of samples to return before the sampler reports
    /// [`OutOfRange`](tidepool_core::TidepoolError::OutOfRange).
    /// `None` means unlimited.
    pub max_samples: Option<u64>,

    /// Largest number of samples a single worker request may ask for.
    pub max_in_flight_samples_per_worker: usize,

    /// Number of worker threads. `None` selects automatically.
    pub num_workers: Option<usize>,

    /// Samples fetched on one worker session before its stream is rotated.
    /// `None` means unlimited.
    pub max_samples_per_stream: Option<u64>,

    /// Deadline handed to the table's rate limiter for every batch.
    pub rate_limiter_timeout: Duration,

    /// Cap on items sampled under a single table lock acquisition. `None`
    /// selects automatically (the table's default for local sampling, the
    /// server's for streams).
    pub flexible_batch_size: Option<usize>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_samples: None,
            max_in_flight_samples_per_worker: DEFAULT_MAX_IN_FLIGHT_SAMPLES_PER_WORKER,
            num_workers: None,
            max_samples_per_stream: Some(DEFAULT_MAX_SAMPLES_PER_STREAM),
            rate_limiter_timeout: DEFAULT_RATE_LIMITER_TIMEOUT,
            flexible_batch_size: None,
        }
    }
}

impl SamplerConfig {
    /// Constructs [`SamplerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let config = serde_yaml::from_reader(rdr)?;
        Ok(config)
    }

    /// Saves [`SamplerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }

    /// Sets the total number of samples to return.
    pub fn max_samples(mut self, max_samples: u64) -> Self {
        self.max_samples = Some(max_samples);
        self
    }

    pub fn max_in_flight_samples_per_worker(mut self, n: usize) -> Self {
        self.max_in_flight_samples_per_worker = n;
        self
    }

    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = Some(num_workers);
        self
    }

    pub fn max_samples_per_stream(mut self, n: u64) -> Self {
        self.max_samples_per_stream = Some(n);
        self
    }

    pub fn rate_limiter_timeout(mut self, timeout: Duration) -> Self {
        self.rate_limiter_timeout = timeout;
        self
    }

    pub fn flexible_batch_size(mut self, n: usize) -> Self {
        self.flexible_batch_size = Some(n);
        self
    }

    /// Checks every field against its allowed range.
    pub fn validate(&self) -> tidepool_core::Result<()> {
        if self.max_samples == Some(0) {
            return Err(TidepoolError::InvalidArgument(
                "max_samples must be >= 1 or unlimited".into(),
            ));
        }
        if self.max_in_flight_samples_per_worker < 1 {
            return Err(TidepoolError::InvalidArgument(
                "max_in_flight_samples_per_worker must be >= 1".into(),
            ));
        }
        if self.num_workers == Some(0) {
            return Err(TidepoolError::InvalidArgument(
                "num_workers must be >= 1 or auto".into(),
            ));
        }
        if self.max_samples_per_stream == Some(0) {
            return Err(TidepoolError::InvalidArgument(
                "max_samples_per_stream must be >= 1 or unlimited".into(),
            ));
        }
        if self.flexible_batch_size == Some(0) {
            return Err(TidepoolError::InvalidArgument(
                "flexible_batch_size must be >= 1 or auto".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn effective_max_samples(&self) -> u64 {
        self.max_samples.unwrap_or(u64::MAX)
    }

    pub(crate) fn effective_max_samples_per_stream(&self) -> u64 {
        self.max_samples_per_stream.unwrap_or(u64::MAX)
    }

    /// Spawning more workers than can ever obtain a first batch is
    /// pointless, so the requested count is capped by how many full
    /// requests fit under the sample cap.
    pub(crate) fn effective_num_workers(&self) -> usize {
        let requested = self.num_workers.unwrap_or(DEFAULT_NUM_WORKERS);
        let useful =
            (self.effective_max_samples() / self.max_in_flight_samples_per_worker as u64).max(1);
        requested.min(usize::try_from(useful).unwrap_or(usize::MAX))
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.num_workers.unwrap_or(1).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SamplerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(SamplerConfig::default().max_samples(0).validate().is_err());
        assert!(SamplerConfig::default().num_workers(0).validate().is_err());
        assert!(SamplerConfig::default()
            .max_samples_per_stream(0)
            .validate()
            .is_err());
        assert!(SamplerConfig::default()
            .flexible_batch_size(0)
            .validate()
            .is_err());
        let mut config = SamplerConfig::default();
        config.max_in_flight_samples_per_worker = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn worker_count_is_capped_by_useful_requests() {
        // Eight requested workers, but one request already covers the cap.
        let config = SamplerConfig::default()
            .max_samples(4)
            .max_in_flight_samples_per_worker(10)
            .num_workers(8);
        assert_eq!(config.effective_num_workers(), 1);

        let config = SamplerConfig::default()
            .max_samples(100)
            .max_in_flight_samples_per_worker(10)
            .num_workers(4);
        assert_eq!(config.effective_num_workers(), 4);
    }

    #[test]
    fn unlimited_samples_keep_the_requested_worker_count() {
        let config = SamplerConfig::default().num_workers(8);
        assert_eq!(config.effective_num_workers(), 8);
        assert_eq!(SamplerConfig::default().effective_num_workers(), DEFAULT_NUM_WORKERS);
    }

    #[test]
    fn yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sampler.yaml");
        let config = SamplerConfig::default()
            .max_samples(7)
            .num_workers(3)
            .rate_limiter_timeout(Duration::from_secs(5));
        config.save(&path).unwrap();

        let loaded = SamplerConfig::load(&path).unwrap();
        assert_eq!(loaded.max_samples, Some(7));
        assert_eq!(loaded.num_workers, Some(3));
        assert_eq!(loaded.rate_limiter_timeout, Duration::from_secs(5));
    }
}

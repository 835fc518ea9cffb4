//! The sampler: owns the workers and exposes the consumer API.
mod base;
mod config;
pub use base::{CloseHandle, Sampler};
pub use config::{
    SamplerConfig, DEFAULT_MAX_IN_FLIGHT_SAMPLES_PER_WORKER, DEFAULT_MAX_SAMPLES_PER_STREAM,
    DEFAULT_NUM_WORKERS,
};

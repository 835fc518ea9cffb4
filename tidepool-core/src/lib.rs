//! Core types for the tidepool experience replay system.
//!
//! # Chunks and trajectories
//!
//! Replay tables store trajectories as references into immutable, compressed
//! [`ChunkData`] payloads. An item's [`FlatTrajectory`] names, per output
//! column, the chunk slices whose rows make up that column. The sampling
//! client (the `tidepool-sampler` crate) resolves descriptors against
//! received chunks to rebuild whole trajectories.
//!
//! # Transports
//!
//! Two transports share one data model. The networked transport streams
//! [`wire::SampleStreamResponse`] messages carrying owned chunks; the
//! in-process transport hands out [`table::SampledItem`]s with shared chunk
//! references. Only the contracts live here; the engine consuming them lives
//! in `tidepool-sampler`.
//!
//! # Tensors
//!
//! Payload tensors are dtype-tagged wrappers over [`ndarray::ArrayD`], see
//! [`tensor::Tensor`]. The optional output signature a consumer may validate
//! against is an ordered list of [`tensor::TensorSpec`]s.
pub mod chunk;
pub mod error;
pub mod table;
pub mod tensor;
pub mod trajectory;
pub mod wire;

pub use chunk::{ChunkData, CompressedTensor};
pub use error::{Result, TidepoolError};
pub use table::{ReplayTable, SampledItem};
pub use tensor::{Dtype, ShapePattern, Tensor, TensorSpec};
pub use trajectory::{ChunkSlice, FlatTrajectory, TrajectoryColumn};
pub use wire::{sample_is_done, SampleInfo, SampleStreamRequest, SampleStreamResponse};

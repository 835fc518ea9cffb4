//! Rebuilding whole samples from streamed responses or table items.
//!
//! Two paths produce the same [`Sample`] shape. Timestep trajectories are
//! unpacked chunk by chunk, releasing each compressed body as soon as its
//! tensor is materialised, so peak memory stays near one chunk per in-flight
//! sample. Everything else goes through the general path: resolve every
//! slice of every column against the received chunks and concatenate.
use std::collections::{HashMap, VecDeque};

use tidepool_core::chunk::ChunkData;
use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::tensor::{delta_decode, Tensor};
use tidepool_core::trajectory::FlatTrajectory;
use tidepool_core::wire::{SampleInfo, SampleStreamResponse};
use tidepool_core::SampledItem;

use crate::sample::Sample;

/// Builds a [`Sample`] from one complete run of stream responses.
///
/// The run must start with a response carrying the item header and the
/// accumulated chunks must cover the trajectory, see
/// [`sample_is_done`](tidepool_core::wire::sample_is_done).
pub fn sample_from_responses(responses: Vec<SampleStreamResponse>) -> Result<Sample> {
    let info = responses
        .first()
        .and_then(|r| r.info.clone())
        .ok_or_else(|| {
            TidepoolError::Internal("response run does not start with an item header".into())
        })?;

    if info.trajectory.is_timestep_trajectory() {
        timestep_sample_from_responses(info, responses)
    } else {
        general_sample_from_responses(info, responses)
    }
}

/// Builds a [`Sample`] from an item drawn off an in-process table.
///
/// Chunks stay shared; only the decoded tensors are owned by the sample.
pub fn sample_from_item(item: &SampledItem) -> Result<Sample> {
    let chunks: HashMap<u64, &ChunkData> = item
        .chunks
        .iter()
        .map(|chunk| (chunk.chunk_key, chunk.as_ref()))
        .collect();

    let columns = unpack_columns(item.key, &item.trajectory, &chunks)?;
    Sample::new(
        item.key,
        item.probability,
        item.table_size,
        item.priority,
        VecDeque::from([columns]),
        item.trajectory.squeeze_flags(),
    )
}

/// Chunk boundaries line up across columns, so the sample can keep one chunk
/// group per source chunk. Only the first chunk is trimmed by the trajectory
/// offset and the last by its tail.
fn timestep_sample_from_responses(
    info: SampleInfo,
    responses: Vec<SampleStreamResponse>,
) -> Result<Sample> {
    let mut offset = info.trajectory.timestep_offset();
    let mut remaining = info.trajectory.timestep_length();
    let mut chunks: VecDeque<Vec<Tensor>> = VecDeque::new();

    for response in responses {
        let Some(data) = response.data else {
            continue;
        };
        if remaining == 0 {
            return Err(TidepoolError::Internal(format!(
                "chunk {} extends past the trajectory of item {}",
                data.chunk_key, info.key
            )));
        }

        let chunk_key = data.chunk_key;
        let delta_encoded = data.delta_encoded;
        let mut compressed = data.tensors;
        let mut batches: Vec<Tensor> = Vec::with_capacity(compressed.len());
        let mut batch_size: Option<usize> = None;

        // Decode back to front so each compressed body is dropped as soon
        // as its tensor exists.
        while let Some(body) = compressed.pop() {
            let mut batch = body.decompress()?;
            drop(body);
            if delta_encoded {
                batch = delta_decode(batch);
            }

            match batch_size {
                None => batch_size = Some(batch.leading_dim()),
                Some(size) if size != batch.leading_dim() => {
                    return Err(TidepoolError::Internal(format!(
                        "chunk {} holds batches of {} and {} rows; batches of one chunk must \
                         have identical leading dimensions",
                        chunk_key,
                        size,
                        batch.leading_dim()
                    )));
                }
                Some(_) => {}
            }

            let size = batch.leading_dim();
            if offset >= size {
                return Err(TidepoolError::Internal(format!(
                    "trajectory offset {} exceeds the {} rows of chunk {}",
                    offset, size, chunk_key
                )));
            }
            batches.push(batch.slice_axis0(offset, (offset + remaining).min(size)));
        }
        batches.reverse();

        let Some(size) = batch_size else {
            return Err(TidepoolError::Internal(format!(
                "chunk {} carries no tensors",
                chunk_key
            )));
        };

        chunks.push_back(batches);
        remaining -= remaining.min(size - offset);
        offset = 0;
    }

    if remaining != 0 {
        return Err(TidepoolError::Internal(format!(
            "received chunks cover {} fewer timesteps than the trajectory of item {}",
            remaining, info.key
        )));
    }

    Sample::new(
        info.key,
        info.probability,
        info.table_size,
        info.priority,
        chunks,
        info.trajectory.squeeze_flags(),
    )
}

fn general_sample_from_responses(
    info: SampleInfo,
    responses: Vec<SampleStreamResponse>,
) -> Result<Sample> {
    let owned: HashMap<u64, ChunkData> = responses
        .into_iter()
        .filter_map(|r| r.data)
        .map(|data| (data.chunk_key, data))
        .collect();
    let chunks: HashMap<u64, &ChunkData> = owned.iter().map(|(&k, v)| (k, v)).collect();

    let columns = unpack_columns(info.key, &info.trajectory, &chunks)?;
    Sample::new(
        info.key,
        info.probability,
        info.table_size,
        info.priority,
        VecDeque::from([columns]),
        info.trajectory.squeeze_flags(),
    )
}

/// Resolves every slice of every column and concatenates per column,
/// yielding the tensors of a single chunk group.
fn unpack_columns(
    item_key: u64,
    trajectory: &FlatTrajectory,
    chunks: &HashMap<u64, &ChunkData>,
) -> Result<Vec<Tensor>> {
    let mut columns = Vec::with_capacity(trajectory.columns.len());
    for (index, column) in trajectory.columns.iter().enumerate() {
        let mut parts = Vec::with_capacity(column.chunk_slices.len());
        for slice in &column.chunk_slices {
            let chunk = chunks.get(&slice.chunk_key).ok_or_else(|| {
                TidepoolError::Internal(format!(
                    "chunk {} could not be found when unpacking item {}",
                    slice.chunk_key, item_key
                ))
            })?;
            let tensor = chunk.decode_tensor(index)?;
            if slice.offset + slice.length > tensor.leading_dim() {
                return Err(TidepoolError::Internal(format!(
                    "slice [{}, {}) of chunk {} exceeds its {} rows",
                    slice.offset,
                    slice.offset + slice.length,
                    slice.chunk_key,
                    tensor.leading_dim()
                )));
            }
            parts.push(tensor.slice_axis0(slice.offset, slice.offset + slice.length));
        }
        columns.push(Tensor::concat(&parts)?);
    }
    Ok(columns)
}

//! In-memory sources shared by the integration tests.
#![allow(dead_code)]
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ndarray::{ArrayD, IxDyn};
use tidepool_core::chunk::{ChunkData, CompressedTensor};
use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::table::{ReplayTable, SampledItem};
use tidepool_core::tensor::Tensor;
use tidepool_core::trajectory::{ChunkSlice, FlatTrajectory, TrajectoryColumn};
use tidepool_core::wire::{SampleInfo, SampleStreamRequest, SampleStreamResponse};
use tidepool_sampler::{SampleStream, SampleStreamClient, StreamContext};

/// Observation column of `timesteps` rows, two features per row, with
/// values derived from `key` so samples are distinguishable.
pub fn obs_tensor(timesteps: usize, key: u64) -> Tensor {
    let values: Vec<f32> = (0..timesteps * 2)
        .map(|i| key as f32 * 100.0 + i as f32)
        .collect();
    Tensor::F32(ArrayD::from_shape_vec(IxDyn(&[timesteps, 2]), values).unwrap())
}

fn single_column_trajectory(chunk_key: u64, timesteps: usize, squeeze: bool) -> FlatTrajectory {
    FlatTrajectory {
        columns: vec![TrajectoryColumn {
            chunk_slices: vec![ChunkSlice {
                chunk_key,
                offset: 0,
                length: timesteps,
            }],
            squeeze,
        }],
    }
}

/// An item whose single data column lives in one chunk.
pub fn item_with_timesteps(key: u64, timesteps: usize) -> SampledItem {
    item_with_squeeze(key, timesteps, false)
}

pub fn item_with_squeeze(key: u64, timesteps: usize, squeeze: bool) -> SampledItem {
    let chunk_key = 1000 + key;
    let chunk = ChunkData::new(
        chunk_key,
        false,
        vec![CompressedTensor::compress(&obs_tensor(timesteps, key)).unwrap()],
    );
    SampledItem {
        key,
        probability: 0.1,
        table_size: 100,
        priority: 1.0,
        trajectory: single_column_trajectory(chunk_key, timesteps, squeeze),
        chunks: vec![Arc::new(chunk)],
    }
}

/// An item whose two data columns have different lengths, so it cannot be
/// decomposed into timesteps.
pub fn ragged_item(key: u64) -> SampledItem {
    let chunk_key = 1000 + key;
    let chunk = ChunkData::new(
        chunk_key,
        false,
        vec![
            CompressedTensor::compress(&obs_tensor(3, key)).unwrap(),
            CompressedTensor::compress(&obs_tensor(1, key)).unwrap(),
        ],
    );
    let column = |length: usize| TrajectoryColumn {
        chunk_slices: vec![ChunkSlice {
            chunk_key,
            offset: 0,
            length,
        }],
        squeeze: false,
    };
    SampledItem {
        key,
        probability: 0.1,
        table_size: 100,
        priority: 1.0,
        trajectory: FlatTrajectory {
            columns: vec![column(3), column(1)],
        },
        chunks: vec![Arc::new(chunk)],
    }
}

/// A table cycling through a fixed list of items.
pub struct TestTable {
    name: String,
    items: Vec<SampledItem>,
    cursor: Mutex<usize>,
}

impl TestTable {
    pub fn new(name: impl Into<String>, items: Vec<SampledItem>) -> Self {
        Self {
            name: name.into(),
            items,
            cursor: Mutex::new(0),
        }
    }
}

impl ReplayTable for TestTable {
    fn sample_flexible_batch(
        &self,
        batch_size: usize,
        _timeout: Duration,
    ) -> Result<Vec<SampledItem>> {
        let mut cursor = self.cursor.lock().unwrap();
        let mut items = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            items.push(self.items[*cursor % self.items.len()].clone());
            *cursor += 1;
        }
        Ok(items)
    }

    fn default_flexible_batch_size(&self) -> usize {
        8
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A table whose rate limiter never releases anything.
pub struct StarvedTable {
    name: String,
}

impl StarvedTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ReplayTable for StarvedTable {
    fn sample_flexible_batch(
        &self,
        _batch_size: usize,
        timeout: Duration,
    ) -> Result<Vec<SampledItem>> {
        // Honour the deadline without making the test wait for real.
        std::thread::sleep(timeout.min(Duration::from_millis(20)));
        Err(TidepoolError::DeadlineExceeded(
            "rate limiter released no items".into(),
        ))
    }

    fn default_flexible_batch_size(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// The responses a server would stream for `item`, with its rows split over
/// `num_chunks` chunks. The first response carries the header.
pub fn responses_for_item(
    key: u64,
    timesteps: usize,
    num_chunks: usize,
) -> Vec<SampleStreamResponse> {
    assert!(num_chunks >= 1 && timesteps % num_chunks == 0);
    let rows_per_chunk = timesteps / num_chunks;
    let whole = obs_tensor(timesteps, key);

    let slices: Vec<ChunkSlice> = (0..num_chunks)
        .map(|i| ChunkSlice {
            chunk_key: key * 10 + i as u64,
            offset: 0,
            length: rows_per_chunk,
        })
        .collect();
    let trajectory = FlatTrajectory {
        columns: vec![TrajectoryColumn {
            chunk_slices: slices.clone(),
            squeeze: false,
        }],
    };

    let mut responses = Vec::with_capacity(num_chunks);
    for (i, slice) in slices.iter().enumerate() {
        let rows = whole.slice_axis0(i * rows_per_chunk, (i + 1) * rows_per_chunk);
        let chunk = ChunkData::new(
            slice.chunk_key,
            false,
            vec![CompressedTensor::compress(&rows).unwrap()],
        );
        responses.push(SampleStreamResponse {
            info: if i == 0 {
                Some(SampleInfo {
                    key,
                    probability: 0.1,
                    table_size: 100,
                    priority: 1.0,
                    trajectory: trajectory.clone(),
                })
            } else {
                None
            },
            data: Some(chunk),
        });
    }
    responses
}

/// One pre-scripted stream: a flat run of responses, then end-of-stream
/// with a fixed terminal status.
pub struct ScriptedStream {
    responses: VecDeque<SampleStreamResponse>,
    terminal: Result<()>,
    context: Option<Arc<StreamContext>>,
}

impl ScriptedStream {
    pub fn new(samples: Vec<Vec<SampleStreamResponse>>, terminal: Result<()>) -> Self {
        Self {
            responses: samples.into_iter().flatten().collect(),
            terminal,
            context: None,
        }
    }

    fn cancelled(&self) -> bool {
        self.context.as_ref().map_or(false, |c| c.is_cancelled())
    }
}

impl SampleStream for ScriptedStream {
    fn write(&mut self, _request: &SampleStreamRequest) -> bool {
        !self.cancelled()
    }

    fn read(&mut self) -> Option<SampleStreamResponse> {
        if self.cancelled() {
            return None;
        }
        self.responses.pop_front()
    }

    fn finish(&mut self) -> Result<()> {
        if self.cancelled() {
            return Err(TidepoolError::Cancelled("stream context cancelled".into()));
        }
        self.terminal.clone()
    }
}

/// Hands out scripted streams in order; opening past the script fails with
/// `Unavailable`.
pub struct ScriptedClient {
    streams: Mutex<VecDeque<ScriptedStream>>,
}

impl ScriptedClient {
    pub fn new(streams: Vec<ScriptedStream>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
        }
    }
}

impl SampleStreamClient for ScriptedClient {
    fn open_stream(&self, context: Arc<StreamContext>) -> Result<Box<dyn SampleStream>> {
        let mut streams = self.streams.lock().unwrap();
        match streams.pop_front() {
            Some(mut stream) => {
                stream.context = Some(context);
                Ok(Box::new(stream))
            }
            None => Err(TidepoolError::Unavailable("server is gone".into())),
        }
    }
}

//! A reassembled sample and its iteration state machine.
use std::collections::VecDeque;

use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::tensor::Tensor;

/// One trajectory drawn from a table, together with its metadata.
///
/// The payload is held as a deque of chunk groups: each group carries one
/// tensor per data column, all sharing the same leading dimension (the
/// number of timesteps contributed by that group). A sample assembled from a
/// non-timestep trajectory always holds exactly one group.
///
/// Emitted vectors lead with four header tensors synthesised from the item
/// metadata: key, probability, table size and priority. Data columns follow
/// from index 4.
#[derive(Debug)]
pub struct Sample {
    key: u64,
    probability: f64,
    table_size: i64,
    priority: f64,
    num_timesteps: usize,
    num_data_columns: usize,
    chunks: VecDeque<Vec<Tensor>>,
    squeeze_columns: Vec<bool>,
    next_timestep_index: usize,
    next_timestep_called: bool,
}

/// Number of synthesised header tensors leading every emitted vector.
pub const NUM_HEADER_TENSORS: usize = 4;

impl Sample {
    pub fn new(
        key: u64,
        probability: f64,
        table_size: i64,
        priority: f64,
        chunks: VecDeque<Vec<Tensor>>,
        squeeze_columns: Vec<bool>,
    ) -> Result<Self> {
        let Some(front) = chunks.front() else {
            return Err(TidepoolError::Internal(
                "a sample must hold at least one chunk group".into(),
            ));
        };
        if front.is_empty() {
            return Err(TidepoolError::Internal(
                "chunk groups must hold at least one tensor".into(),
            ));
        }
        let num_data_columns = front.len();
        if chunks.iter().any(|group| group.len() != num_data_columns) {
            return Err(TidepoolError::Internal(
                "all chunk groups of a sample must hold the same number of tensors".into(),
            ));
        }
        let num_timesteps = chunks
            .iter()
            .map(|group| group[0].leading_dim())
            .sum::<usize>();

        Ok(Self {
            key,
            probability,
            table_size,
            priority,
            num_timesteps,
            num_data_columns,
            chunks,
            squeeze_columns,
            next_timestep_index: 0,
            next_timestep_called: false,
        })
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn table_size(&self) -> i64 {
        self.table_size
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    /// Total timesteps across all chunk groups, fixed at construction.
    pub fn num_timesteps(&self) -> usize {
        self.num_timesteps
    }

    pub fn num_data_columns(&self) -> usize {
        self.num_data_columns
    }

    /// True once every timestep has been emitted.
    pub fn is_end_of_sample(&self) -> bool {
        self.chunks.is_empty()
    }

    /// True when every data column spans the same number of timesteps, so
    /// the sample can be stepped through row by row.
    pub fn is_composed_of_timesteps(&self) -> bool {
        let mut lengths = vec![0usize; self.num_data_columns];
        for group in &self.chunks {
            for (length, tensor) in lengths.iter_mut().zip(group) {
                *length += tensor.leading_dim();
            }
        }
        lengths.iter().all(|&l| l == lengths[0])
    }

    /// Emits the next timestep as `[key, probability, table_size, priority,
    /// col0[i], col1[i], ...]` and advances the iterator.
    pub fn next_timestep(&mut self) -> Result<Vec<Tensor>> {
        if !self.is_composed_of_timesteps() {
            return Err(TidepoolError::FailedPrecondition(
                "sample cannot be decomposed into timesteps".into(),
            ));
        }
        let Some(front) = self.chunks.front() else {
            return Err(TidepoolError::FailedPrecondition(
                "all timesteps of the sample have been emitted".into(),
            ));
        };

        let mut result = Vec::with_capacity(self.num_data_columns + NUM_HEADER_TENSORS);
        result.push(Tensor::scalar_u64(self.key));
        result.push(Tensor::scalar_f64(self.probability));
        result.push(Tensor::scalar_i64(self.table_size));
        result.push(Tensor::scalar_f64(self.priority));
        for tensor in front {
            result.push(tensor.sub_slice(self.next_timestep_index));
        }

        self.next_timestep_index += 1;
        if self.next_timestep_index == front[0].leading_dim() {
            self.chunks.pop_front();
            self.next_timestep_index = 0;
        }
        self.next_timestep_called = true;

        Ok(result)
    }

    /// Emits the whole sample with header fields tiled over the timesteps
    /// and data columns concatenated across chunk groups. Consumes the
    /// payload.
    pub fn as_batched_timesteps(&mut self) -> Result<Vec<Tensor>> {
        if self.next_timestep_called {
            return Err(TidepoolError::DataLoss(
                "timesteps were already emitted from this sample".into(),
            ));
        }
        if !self.is_composed_of_timesteps() {
            return Err(TidepoolError::FailedPrecondition(
                "sample cannot be decomposed into timesteps".into(),
            ));
        }

        let mut result = Vec::with_capacity(self.num_data_columns + NUM_HEADER_TENSORS);
        result.push(Tensor::fill_u64(self.key, self.num_timesteps));
        result.push(Tensor::fill_f64(self.probability, self.num_timesteps));
        result.push(Tensor::fill_i64(self.table_size, self.num_timesteps));
        result.push(Tensor::fill_f64(self.priority, self.num_timesteps));

        for column in self.take_columns() {
            result.push(Tensor::concat(&column)?);
        }

        Ok(result)
    }

    /// Emits the whole trajectory with rank-0 header fields and squeeze
    /// columns collapsed. Consumes the payload.
    pub fn as_trajectory(&mut self) -> Result<Vec<Tensor>> {
        if self.next_timestep_called {
            return Err(TidepoolError::DataLoss(
                "timesteps were already emitted from this sample".into(),
            ));
        }

        let mut result = Vec::with_capacity(self.num_data_columns + NUM_HEADER_TENSORS);
        result.push(Tensor::scalar_u64(self.key));
        result.push(Tensor::scalar_f64(self.probability));
        result.push(Tensor::scalar_i64(self.table_size));
        result.push(Tensor::scalar_f64(self.priority));

        if self.chunks.len() == 1 {
            // A single group needs no concatenation; move its columns out.
            if let Some(group) = self.chunks.pop_front() {
                result.extend(group);
            }
        } else {
            for column in self.take_columns() {
                result.push(Tensor::concat(&column)?);
            }
        }

        for (i, &squeeze) in self.squeeze_columns.iter().enumerate() {
            if !squeeze {
                continue;
            }
            let leading = result[i + NUM_HEADER_TENSORS].leading_dim();
            if leading != 1 {
                return Err(TidepoolError::Internal(format!(
                    "tried to squeeze column {} with leading dimension {}",
                    i, leading
                )));
            }
            let squeezed = result[i + NUM_HEADER_TENSORS].sub_slice(0);
            result[i + NUM_HEADER_TENSORS] = squeezed;
        }

        Ok(result)
    }

    /// Drains the chunk groups into column-major order:
    /// `columns[i][j]` is the j-th group's tensor of data column i.
    fn take_columns(&mut self) -> Vec<Vec<Tensor>> {
        let mut columns: Vec<Vec<Tensor>> = (0..self.num_data_columns)
            .map(|_| Vec::with_capacity(self.chunks.len()))
            .collect();
        while let Some(group) = self.chunks.pop_front() {
            for (column, tensor) in columns.iter_mut().zip(group) {
                column.push(tensor);
            }
        }
        columns
    }
}

//! Flat trajectory descriptors.
//!
//! An item stored in a replay table does not carry its payload directly.
//! Instead it carries a recipe: for every output column, the ordered list of
//! chunk slices whose rows make up that column. The sampling client follows
//! the recipe to reassemble the trajectory from the chunks it received.
use serde::{Deserialize, Serialize};

/// A contiguous run of rows `[offset, offset + length)` within one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSlice {
    pub chunk_key: u64,
    pub offset: usize,
    pub length: usize,
}

/// One output column of a trajectory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrajectoryColumn {
    pub chunk_slices: Vec<ChunkSlice>,

    /// When set, the column's leading dimension must be 1 and is removed
    /// when the trajectory is emitted whole.
    pub squeeze: bool,
}

impl TrajectoryColumn {
    pub fn total_length(&self) -> usize {
        self.chunk_slices.iter().map(|s| s.length).sum()
    }
}

/// The column/slice recipe for assembling one sample from chunks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatTrajectory {
    pub columns: Vec<TrajectoryColumn>,
}

impl FlatTrajectory {
    /// Keys of every chunk referenced by any column, deduplicated, in first
    /// reference order.
    pub fn chunk_keys(&self) -> Vec<u64> {
        let mut keys = Vec::new();
        for column in &self.columns {
            for slice in &column.chunk_slices {
                if !keys.contains(&slice.chunk_key) {
                    keys.push(slice.chunk_key);
                }
            }
        }
        keys
    }

    /// True when every column covers the same rows of the same sequence of
    /// chunks, i.e. all columns have one slice per chunk with identical
    /// `(offset, length)` pairs. Such a trajectory can be decomposed into
    /// per-timestep rows.
    pub fn is_timestep_trajectory(&self) -> bool {
        let Some((first, rest)) = self.columns.split_first() else {
            return false;
        };
        rest.iter().all(|column| {
            column.chunk_slices.len() == first.chunk_slices.len()
                && column
                    .chunk_slices
                    .iter()
                    .zip(&first.chunk_slices)
                    .all(|(a, b)| a.offset == b.offset && a.length == b.length)
        })
    }

    /// Leading rows of the first chunk that do not belong to the trajectory.
    pub fn timestep_offset(&self) -> usize {
        self.columns
            .first()
            .and_then(|c| c.chunk_slices.first())
            .map(|s| s.offset)
            .unwrap_or(0)
    }

    /// Total number of timesteps described by the first column.
    pub fn timestep_length(&self) -> usize {
        self.columns.first().map(|c| c.total_length()).unwrap_or(0)
    }

    pub fn squeeze_flags(&self) -> Vec<bool> {
        self.columns.iter().map(|c| c.squeeze).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice(chunk_key: u64, offset: usize, length: usize) -> ChunkSlice {
        ChunkSlice {
            chunk_key,
            offset,
            length,
        }
    }

    fn column(slices: Vec<ChunkSlice>) -> TrajectoryColumn {
        TrajectoryColumn {
            chunk_slices: slices,
            squeeze: false,
        }
    }

    #[test]
    fn chunk_keys_deduplicates_in_first_reference_order() {
        let traj = FlatTrajectory {
            columns: vec![
                column(vec![slice(3, 0, 2), slice(9, 0, 1)]),
                column(vec![slice(4, 0, 2), slice(9, 0, 1)]),
            ],
        };
        assert_eq!(traj.chunk_keys(), vec![3, 9, 4]);
    }

    #[test]
    fn aligned_columns_form_a_timestep_trajectory() {
        let traj = FlatTrajectory {
            columns: vec![
                column(vec![slice(1, 2, 3), slice(2, 0, 4)]),
                column(vec![slice(3, 2, 3), slice(4, 0, 4)]),
            ],
        };
        assert!(traj.is_timestep_trajectory());
        assert_eq!(traj.timestep_offset(), 2);
        assert_eq!(traj.timestep_length(), 7);
    }

    #[test]
    fn ragged_columns_are_not_a_timestep_trajectory() {
        let traj = FlatTrajectory {
            columns: vec![
                column(vec![slice(1, 0, 3)]),
                column(vec![slice(2, 0, 1)]),
            ],
        };
        assert!(!traj.is_timestep_trajectory());
    }

    #[test]
    fn empty_trajectory_is_not_a_timestep_trajectory() {
        assert!(!FlatTrajectory::default().is_timestep_trajectory());
    }
}

//! Messages of the sample stream.
//!
//! The transport itself lives outside this crate; these are the values that
//! cross it. One logical sample is delivered as a run of responses: the
//! first carries the item header, and the run is complete once the received
//! chunks cover every key the trajectory descriptor refers to.
use crate::chunk::ChunkData;
use crate::trajectory::FlatTrajectory;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Client request for a batch of samples from one table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleStreamRequest {
    pub table: String,

    /// Number of samples the server should stream before reading the next
    /// request.
    pub num_samples: u64,

    /// Deadline passed through to the table's rate limiter.
    pub rate_limiter_timeout_ms: u64,

    /// Cap on items sampled under a single table lock acquisition. `None`
    /// lets the server pick its default.
    pub flexible_batch_size: Option<usize>,
}

/// Header of one sampled item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleInfo {
    pub key: u64,
    pub probability: f64,
    pub table_size: i64,
    pub priority: f64,
    pub trajectory: FlatTrajectory,
}

/// One message of the response stream.
///
/// `info` is populated on the first response of each logical sample. A
/// response without `data` is valid; it carries the header alone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleStreamResponse {
    pub info: Option<SampleInfo>,
    pub data: Option<ChunkData>,
}

/// True once `responses` holds a complete logical sample: the first response
/// carries the header and the accumulated chunk keys cover every key its
/// trajectory refers to.
pub fn sample_is_done(responses: &[SampleStreamResponse]) -> bool {
    let Some(info) = responses.first().and_then(|r| r.info.as_ref()) else {
        return false;
    };

    let received: HashSet<u64> = responses
        .iter()
        .filter_map(|r| r.data.as_ref())
        .map(|d| d.chunk_key)
        .collect();

    info.trajectory
        .chunk_keys()
        .iter()
        .all(|key| received.contains(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::{ChunkSlice, TrajectoryColumn};

    fn info_over_chunks(keys: &[u64]) -> SampleInfo {
        SampleInfo {
            key: 1,
            probability: 0.5,
            table_size: 10,
            priority: 1.0,
            trajectory: FlatTrajectory {
                columns: vec![TrajectoryColumn {
                    chunk_slices: keys
                        .iter()
                        .map(|&chunk_key| ChunkSlice {
                            chunk_key,
                            offset: 0,
                            length: 1,
                        })
                        .collect(),
                    squeeze: false,
                }],
            },
        }
    }

    fn data_response(chunk_key: u64) -> SampleStreamResponse {
        SampleStreamResponse {
            info: None,
            data: Some(ChunkData::new(chunk_key, false, Vec::new())),
        }
    }

    #[test]
    fn incomplete_until_all_chunks_received() {
        let mut responses = vec![SampleStreamResponse {
            info: Some(info_over_chunks(&[10, 11])),
            data: Some(ChunkData::new(10, false, Vec::new())),
        }];
        assert!(!sample_is_done(&responses));

        responses.push(data_response(11));
        assert!(sample_is_done(&responses));
    }

    #[test]
    fn empty_run_is_never_done() {
        assert!(!sample_is_done(&[]));
    }

    #[test]
    fn header_only_first_response_counts_toward_completion() {
        let responses = vec![
            SampleStreamResponse {
                info: Some(info_over_chunks(&[5])),
                data: None,
            },
            data_response(5),
        ];
        assert!(sample_is_done(&responses));
    }
}

//! Compressed chunk payloads.
//!
//! A chunk is the unit of storage on the server side: a contiguous run of
//! timesteps, one compressed tensor per data column, addressed by a 64-bit
//! key. Chunks arrive either owned (streamed over the network) or shared
//! behind an [`Arc`](std::sync::Arc) (sampled from an in-process table).
use crate::error::{Result, TidepoolError};
use crate::tensor::{delta_decode, Dtype, Tensor};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// A single tensor stored as a zlib-deflated little-endian element buffer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompressedTensor {
    dtype: Dtype,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

impl CompressedTensor {
    /// Compresses `tensor` into a wire-ready body.
    pub fn compress(tensor: &Tensor) -> Result<CompressedTensor> {
        let mut raw = Vec::new();
        match tensor {
            Tensor::U64(a) => {
                for v in a.iter() {
                    raw.extend_from_slice(&v.to_le_bytes());
                }
            }
            Tensor::I64(a) => {
                for v in a.iter() {
                    raw.extend_from_slice(&v.to_le_bytes());
                }
            }
            Tensor::F32(a) => {
                for v in a.iter() {
                    raw.extend_from_slice(&v.to_le_bytes());
                }
            }
            Tensor::F64(a) => {
                for v in a.iter() {
                    raw.extend_from_slice(&v.to_le_bytes());
                }
            }
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&raw)
            .and_then(|_| encoder.finish())
            .map(|bytes| CompressedTensor {
                dtype: tensor.dtype(),
                shape: tensor.shape().to_vec(),
                bytes,
            })
            .map_err(|e| TidepoolError::Internal(format!("tensor compression failed: {}", e)))
    }

    /// Inflates the body back into a [`Tensor`].
    pub fn decompress(&self) -> Result<Tensor> {
        let mut raw = Vec::new();
        ZlibDecoder::new(&self.bytes[..])
            .read_to_end(&mut raw)
            .map_err(|e| TidepoolError::Internal(format!("tensor decompression failed: {}", e)))?;

        match self.dtype {
            Dtype::U64 => decode_elements(&self.shape, &raw, u64::from_le_bytes).map(Tensor::U64),
            Dtype::I64 => decode_elements(&self.shape, &raw, i64::from_le_bytes).map(Tensor::I64),
            Dtype::F32 => decode_elements(&self.shape, &raw, f32::from_le_bytes).map(Tensor::F32),
            Dtype::F64 => decode_elements(&self.shape, &raw, f64::from_le_bytes).map(Tensor::F64),
        }
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

fn decode_elements<T, const N: usize>(
    shape: &[usize],
    raw: &[u8],
    from_le: fn([u8; N]) -> T,
) -> Result<ArrayD<T>> {
    if raw.len() % N != 0 {
        return Err(TidepoolError::Internal(format!(
            "compressed body of {} bytes is not a whole number of {}-byte elements",
            raw.len(),
            N
        )));
    }
    let elements: Vec<T> = raw
        .chunks_exact(N)
        .map(|c| {
            let mut buf = [0u8; N];
            buf.copy_from_slice(c);
            from_le(buf)
        })
        .collect();
    ArrayD::from_shape_vec(IxDyn(shape), elements).map_err(|e| {
        TidepoolError::Internal(format!("decoded elements do not fit shape {:?}: {}", shape, e))
    })
}

/// One server-side chunk: a run of timesteps for every data column.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkData {
    /// Key the trajectory descriptor refers to this chunk by.
    pub chunk_key: u64,

    /// Whether rows were delta encoded before compression.
    pub delta_encoded: bool,

    /// One compressed tensor per data column, in column order.
    pub tensors: Vec<CompressedTensor>,
}

impl ChunkData {
    pub fn new(chunk_key: u64, delta_encoded: bool, tensors: Vec<CompressedTensor>) -> Self {
        Self {
            chunk_key,
            delta_encoded,
            tensors,
        }
    }

    /// Decodes the tensor of data column `column`, undoing delta encoding
    /// when the chunk is flagged.
    pub fn decode_tensor(&self, column: usize) -> Result<Tensor> {
        let compressed = self.tensors.get(column).ok_or_else(|| {
            TidepoolError::Internal(format!(
                "chunk {} has {} tensors but column {} was requested",
                self.chunk_key,
                self.tensors.len(),
                column
            ))
        })?;
        let tensor = compressed.decompress()?;
        Ok(if self.delta_encoded {
            delta_decode(tensor)
        } else {
            tensor
        })
    }
}

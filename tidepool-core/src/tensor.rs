//! Dtype-tagged tensors backed by [`ndarray`].
//!
//! Trajectories move through the client as flat vectors of [`Tensor`]s. The
//! engine only ever manipulates the leading (time) axis: slicing, sub-slicing
//! and concatenation. Everything else is opaque payload.
use crate::error::{Result, TidepoolError};
use ndarray::{concatenate, ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a [`Tensor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    U64,
    I64,
    F32,
    F64,
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dtype::U64 => "u64",
            Dtype::I64 => "i64",
            Dtype::F32 => "f32",
            Dtype::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

/// A dynamically shaped tensor of one of the supported dtypes.
#[derive(Clone, Debug, PartialEq)]
pub enum Tensor {
    U64(ArrayD<u64>),
    I64(ArrayD<i64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

macro_rules! with_array {
    ($t:expr, $a:ident => $e:expr) => {
        match $t {
            Tensor::U64($a) => $e,
            Tensor::I64($a) => $e,
            Tensor::F32($a) => $e,
            Tensor::F64($a) => $e,
        }
    };
}

macro_rules! map_array {
    ($t:expr, $a:ident => $e:expr) => {
        match $t {
            Tensor::U64($a) => Tensor::U64($e),
            Tensor::I64($a) => Tensor::I64($e),
            Tensor::F32($a) => Tensor::F32($e),
            Tensor::F64($a) => Tensor::F64($e),
        }
    };
}

impl Tensor {
    pub fn dtype(&self) -> Dtype {
        match self {
            Tensor::U64(_) => Dtype::U64,
            Tensor::I64(_) => Dtype::I64,
            Tensor::F32(_) => Dtype::F32,
            Tensor::F64(_) => Dtype::F64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        with_array!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        with_array!(self, a => a.ndim())
    }

    /// Length of the leading (time) axis.
    ///
    /// Chunk payloads always carry a leading batch dimension, so callers on
    /// the sampling path never see a rank-0 tensor here.
    pub fn leading_dim(&self) -> usize {
        self.shape()[0]
    }

    /// Returns rows `[lo, hi)` of the leading axis as an owned tensor.
    ///
    /// The result is materialised into standard layout, so downstream code
    /// never observes a borrowed or strided view.
    pub fn slice_axis0(&self, lo: usize, hi: usize) -> Tensor {
        map_array!(self, a => a.slice_axis(Axis(0), Slice::from(lo..hi)).to_owned())
    }

    /// Returns row `i`, dropping the leading axis.
    pub fn sub_slice(&self, i: usize) -> Tensor {
        map_array!(self, a => a.index_axis(Axis(0), i).to_owned())
    }

    /// Concatenates `parts` along the leading axis.
    pub fn concat(parts: &[Tensor]) -> Result<Tensor> {
        macro_rules! concat_as {
            ($variant:ident) => {{
                let mut views = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        Tensor::$variant(a) => views.push(a.view()),
                        other => {
                            return Err(TidepoolError::Internal(format!(
                                "cannot concatenate {} tensor with {} tensor",
                                parts[0].dtype(),
                                other.dtype()
                            )))
                        }
                    }
                }
                concatenate(Axis(0), &views)
                    .map(Tensor::$variant)
                    .map_err(|e| TidepoolError::Internal(format!("concat failed: {}", e)))
            }};
        }

        match parts.first() {
            None => Err(TidepoolError::Internal(
                "cannot concatenate an empty set of tensors".into(),
            )),
            Some(Tensor::U64(_)) => concat_as!(U64),
            Some(Tensor::I64(_)) => concat_as!(I64),
            Some(Tensor::F32(_)) => concat_as!(F32),
            Some(Tensor::F64(_)) => concat_as!(F64),
        }
    }

    /// Rank-0 constructors for the sample header fields.
    pub fn scalar_u64(v: u64) -> Tensor {
        Tensor::U64(ArrayD::from_elem(IxDyn(&[]), v))
    }

    pub fn scalar_i64(v: i64) -> Tensor {
        Tensor::I64(ArrayD::from_elem(IxDyn(&[]), v))
    }

    pub fn scalar_f64(v: f64) -> Tensor {
        Tensor::F64(ArrayD::from_elem(IxDyn(&[]), v))
    }

    /// Rank-1 constructors of length `n`, used to tile header fields over
    /// the timesteps of a batched sample.
    pub fn fill_u64(v: u64, n: usize) -> Tensor {
        Tensor::U64(ArrayD::from_elem(IxDyn(&[n]), v))
    }

    pub fn fill_i64(v: i64, n: usize) -> Tensor {
        Tensor::I64(ArrayD::from_elem(IxDyn(&[n]), v))
    }

    pub fn fill_f64(v: f64, n: usize) -> Tensor {
        Tensor::F64(ArrayD::from_elem(IxDyn(&[n]), v))
    }

    pub fn as_u64(&self) -> Option<&ArrayD<u64>> {
        match self {
            Tensor::U64(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            Tensor::I64(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Tensor::F32(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&ArrayD<f64>> {
        match self {
            Tensor::F64(a) => Some(a),
            _ => None,
        }
    }
}

impl From<ArrayD<u64>> for Tensor {
    fn from(a: ArrayD<u64>) -> Self {
        Tensor::U64(a)
    }
}

impl From<ArrayD<i64>> for Tensor {
    fn from(a: ArrayD<i64>) -> Self {
        Tensor::I64(a)
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(a: ArrayD<f32>) -> Self {
        Tensor::F32(a)
    }
}

impl From<ArrayD<f64>> for Tensor {
    fn from(a: ArrayD<f64>) -> Self {
        Tensor::F64(a)
    }
}

fn delta_decode_array<T>(mut arr: ArrayD<T>) -> ArrayD<T>
where
    T: num_traits::Num + Copy,
{
    if arr.ndim() == 0 || arr.shape()[0] < 2 {
        return arr;
    }
    for i in 1..arr.shape()[0] {
        let (prev, mut cur) = arr.view_mut().split_at(Axis(0), i);
        let prev_row = prev.index_axis(Axis(0), i - 1);
        let mut cur_row = cur.index_axis_mut(Axis(0), 0);
        cur_row.zip_mut_with(&prev_row, |c, &p| *c = *c + p);
    }
    arr
}

/// Inverts delta encoding by accumulating rows along the leading axis.
pub fn delta_decode(tensor: Tensor) -> Tensor {
    map_array!(tensor, a => delta_decode_array(a))
}

/// Shape pattern admitting unknown dimensions.
///
/// `None` entries match any size; compatibility is dimension-wise and the
/// rank must agree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapePattern(pub Vec<Option<usize>>);

impl ShapePattern {
    pub fn scalar() -> Self {
        ShapePattern(Vec::new())
    }

    /// Fully known shape.
    pub fn known(dims: &[usize]) -> Self {
        ShapePattern(dims.iter().map(|&d| Some(d)).collect())
    }

    pub fn is_compatible_with(&self, shape: &[usize]) -> bool {
        self.0.len() == shape.len()
            && self
                .0
                .iter()
                .zip(shape)
                .all(|(pat, &dim)| pat.map_or(true, |p| p == dim))
    }
}

impl fmt::Display for ShapePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match d {
                Some(d) => write!(f, "{}", d)?,
                None => write!(f, "?")?,
            }
        }
        write!(f, "]")
    }
}

/// Declared dtype and shape of one output tensor.
///
/// An ordered list of these forms the output signature a consumer may supply
/// to validate every returned vector against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: Dtype,
    pub shape: ShapePattern,
}

impl TensorSpec {
    pub fn new(dtype: Dtype, shape: ShapePattern) -> Self {
        Self { dtype, shape }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn slice_and_sub_slice() {
        let t = Tensor::F32(array![[0.0f32, 1.0], [2.0, 3.0], [4.0, 5.0]].into_dyn());
        let s = t.slice_axis0(1, 3);
        assert_eq!(s.shape(), &[2, 2]);
        let row = s.sub_slice(0);
        assert_eq!(row.shape(), &[2]);
        assert_eq!(row.as_f32().unwrap().as_slice().unwrap(), &[2.0, 3.0]);
    }

    #[test]
    fn concat_joins_leading_axis() {
        let a = Tensor::I64(array![[1i64], [2]].into_dyn());
        let b = Tensor::I64(array![[3i64]].into_dyn());
        let c = Tensor::concat(&[a, b]).unwrap();
        assert_eq!(c.shape(), &[3, 1]);
    }

    #[test]
    fn concat_rejects_mixed_dtypes() {
        let a = Tensor::I64(array![1i64].into_dyn());
        let b = Tensor::F32(array![1.0f32].into_dyn());
        let err = Tensor::concat(&[a, b]).unwrap_err();
        assert!(matches!(err, TidepoolError::Internal(_)));
    }

    #[test]
    fn delta_decode_accumulates_rows() {
        let t = Tensor::I64(array![[1i64, 10], [1, 1], [1, 1]].into_dyn());
        let decoded = delta_decode(t);
        assert_eq!(
            decoded.as_i64().unwrap().as_slice().unwrap(),
            &[1, 10, 2, 11, 3, 12]
        );
    }

    #[test]
    fn shape_pattern_compatibility() {
        let pat = ShapePattern(vec![None, Some(3)]);
        assert!(pat.is_compatible_with(&[7, 3]));
        assert!(!pat.is_compatible_with(&[7, 4]));
        assert!(!pat.is_compatible_with(&[7]));
        assert!(ShapePattern::scalar().is_compatible_with(&[]));
    }
}

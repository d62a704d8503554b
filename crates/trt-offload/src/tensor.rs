use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{DType, TensorSpec};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    #[error("tensor of {dtype} with dims {dims:?} needs {expected} bytes, got {actual}")]
    ByteLength {
        dtype: DType,
        dims: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("tensor element count overflows for dims {0:?}")]
    Overflow(Vec<usize>),
    #[error("expected a {expected} tensor, found {found}")]
    DTypeMismatch { expected: DType, found: DType },
}

/// Host-resident tensor with concrete dims and little-endian element bytes.
///
/// Bytes are shared so cloning a tensor (or a parameter blob) never copies
/// weight data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTensor {
    dtype: DType,
    dims: Vec<usize>,
    bytes: Arc<[u8]>,
}

impl HostTensor {
    pub fn new(dtype: DType, dims: Vec<usize>, bytes: impl Into<Arc<[u8]>>) -> Result<Self, TensorError> {
        let bytes = bytes.into();
        let expected = byte_len_for(dtype, &dims)?;
        if bytes.len() != expected {
            return Err(TensorError::ByteLength {
                dtype,
                dims,
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self { dtype, dims, bytes })
    }

    pub fn zeros(dtype: DType, dims: Vec<usize>) -> Result<Self, TensorError> {
        let len = byte_len_for(dtype, &dims)?;
        Self::new(dtype, dims, vec![0u8; len])
    }

    pub fn from_f32(dims: Vec<usize>, values: &[f32]) -> Result<Self, TensorError> {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Self::new(DType::F32, dims, bytes)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn spec(&self) -> TensorSpec {
        TensorSpec::with_static(self.dtype, &self.dims)
    }

    /// Decodes float32 contents.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>, TensorError> {
        if self.dtype != DType::F32 {
            return Err(TensorError::DTypeMismatch {
                expected: DType::F32,
                found: self.dtype,
            });
        }
        Ok(self
            .bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

fn byte_len_for(dtype: DType, dims: &[usize]) -> Result<usize, TensorError> {
    dims.iter()
        .try_fold(dtype.size_in_bytes(), |acc, dim| acc.checked_mul(*dim))
        .ok_or_else(|| TensorError::Overflow(dims.to_vec()))
}

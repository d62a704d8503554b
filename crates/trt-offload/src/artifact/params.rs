//! Parameter blob: a length-prefixed bincode index followed by raw
//! little-endian tensor data.
//!
//! Layout: `MAGIC | version: u32 | index_len: u32 | index | data`. Index
//! offsets are relative to the start of `data` and entries are contiguous.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ir::{DType, Graph, Input, TensorSpec};
use crate::tensor::HostTensor;

use super::ArtifactError;

const MAGIC: &[u8; 8] = b"TRTOPRMS";
const VERSION: u32 = 1;
const BLOB: &str = "parameter blob";

/// Named constant tensors referenced by `Input::Param` operands.
pub type ParamBlob = BTreeMap<String, HostTensor>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamBindingError {
    #[error("parameter '{0}' is referenced by the graph but missing from the blob")]
    Missing(String),
    #[error("parameter '{name}' is declared as {declared} but the blob holds {found}")]
    Mismatch {
        name: String,
        declared: TensorSpec,
        found: TensorSpec,
    },
}

/// Every parameter the graph references must be present with exactly its
/// declared type.
pub fn check_param_bindings(graph: &Graph, params: &ParamBlob) -> Result<(), ParamBindingError> {
    for name in graph.referenced_params() {
        let tensor = params
            .get(name)
            .ok_or_else(|| ParamBindingError::Missing(name.to_string()))?;
        let Some(decl) = graph.param(name) else {
            return Err(ParamBindingError::Missing(name.to_string()));
        };
        let found = tensor.spec();
        if decl.spec.dtype != found.dtype || !decl.spec.shape.admits(tensor.dims()) {
            return Err(ParamBindingError::Mismatch {
                name: name.to_string(),
                declared: decl.spec.clone(),
                found,
            });
        }
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct ParamIndex {
    entries: Vec<ParamIndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ParamIndexEntry {
    name: String,
    dtype_tag: u32,
    dims: Vec<u64>,
    offset: u64,
    len: u64,
}

pub fn encode_params(params: &ParamBlob) -> Result<Vec<u8>, ArtifactError> {
    let mut entries = Vec::with_capacity(params.len());
    let mut offset = 0u64;
    for (name, tensor) in params {
        let len = tensor.bytes().len() as u64;
        entries.push(ParamIndexEntry {
            name: name.clone(),
            dtype_tag: tensor.dtype().tag(),
            dims: tensor.dims().iter().map(|d| *d as u64).collect(),
            offset,
            len,
        });
        offset += len;
    }
    let index = bincode::serialize(&ParamIndex { entries })
        .map_err(|source| ArtifactError::Bincode { blob: BLOB, source })?;
    let index_len = u32::try_from(index.len()).map_err(|_| ArtifactError::Malformed {
        blob: BLOB,
        detail: format!("index of {} bytes exceeds the format limit", index.len()),
    })?;

    let mut out = Vec::with_capacity(16 + index.len() + offset as usize);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&index_len.to_le_bytes());
    out.extend_from_slice(&index);
    for tensor in params.values() {
        out.extend_from_slice(tensor.bytes());
    }
    Ok(out)
}

pub fn decode_params(bytes: &[u8]) -> Result<ParamBlob, ArtifactError> {
    let mut reader = ByteReader::new(BLOB, bytes);
    if reader.take(MAGIC.len())? != MAGIC {
        return Err(ArtifactError::BadMagic { blob: BLOB });
    }
    let version = reader.u32()?;
    if version != VERSION {
        return Err(ArtifactError::UnsupportedVersion {
            blob: BLOB,
            version,
        });
    }
    let index_len = reader.u32()? as usize;
    let index: ParamIndex = bincode::deserialize(reader.take(index_len)?)
        .map_err(|source| ArtifactError::Bincode { blob: BLOB, source })?;
    let data = reader.rest();

    let mut params = ParamBlob::new();
    let mut cursor = 0u64;
    for entry in index.entries {
        let dtype = DType::from_tag(entry.dtype_tag).ok_or_else(|| ArtifactError::Malformed {
            blob: BLOB,
            detail: format!("unknown dtype tag {} for '{}'", entry.dtype_tag, entry.name),
        })?;
        if entry.offset != cursor {
            return Err(ArtifactError::Malformed {
                blob: BLOB,
                detail: format!("entry '{}' is not contiguous", entry.name),
            });
        }
        let end = entry
            .offset
            .checked_add(entry.len)
            .filter(|end| *end <= data.len() as u64)
            .ok_or_else(|| ArtifactError::Truncated {
                blob: BLOB,
                detail: format!("data for '{}' runs past the end of the blob", entry.name),
            })?;
        let dims = entry
            .dims
            .iter()
            .map(|d| usize::try_from(*d))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ArtifactError::Malformed {
                blob: BLOB,
                detail: format!("dims of '{}' overflow", entry.name),
            })?;
        let slice = &data[entry.offset as usize..end as usize];
        let tensor = HostTensor::new(dtype, dims, slice.to_vec()).map_err(|err| {
            ArtifactError::Malformed {
                blob: BLOB,
                detail: format!("'{}': {err}", entry.name),
            }
        })?;
        if params.insert(entry.name.clone(), tensor).is_some() {
            return Err(ArtifactError::Malformed {
                blob: BLOB,
                detail: format!("duplicate entry '{}'", entry.name),
            });
        }
        cursor = end;
    }
    if cursor != data.len() as u64 {
        return Err(ArtifactError::Malformed {
            blob: BLOB,
            detail: format!("{} trailing bytes after the last entry", data.len() as u64 - cursor),
        });
    }
    Ok(params)
}

/// Bounds-checked cursor over a blob.
pub(super) struct ByteReader<'a> {
    blob: &'static str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(super) fn new(blob: &'static str, bytes: &'a [u8]) -> Self {
        Self { blob, bytes, pos: 0 }
    }

    pub(super) fn take(&mut self, len: usize) -> Result<&'a [u8], ArtifactError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| ArtifactError::Truncated {
                blob: self.blob,
                detail: format!(
                    "needed {len} bytes at offset {}, {} available",
                    self.pos,
                    self.bytes.len().saturating_sub(self.pos)
                ),
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(super) fn u32(&mut self) -> Result<u32, ArtifactError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(super) fn u64(&mut self) -> Result<u64, ArtifactError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    pub(super) fn rest(&mut self) -> &'a [u8] {
        let slice = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        slice
    }
}

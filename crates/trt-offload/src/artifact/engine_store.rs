//! Persisted engines keyed by shape.
//!
//! An empty store encodes to zero bytes. Otherwise the layout is
//! `MAGIC | version: u32 | body_len: u64 | bincode body | fnv1a(body): u64`.
//! Engine bytes themselves are owned by the accelerator and never inspected.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::shape_key::ShapeKey;

use super::params::ByteReader;
use super::ArtifactError;

const MAGIC: &[u8; 8] = b"TRTOENGS";
const VERSION: u32 = 1;
const BLOB: &str = "engine store";

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

/// Accelerator that produced a store's engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceleratorId {
    pub name: String,
    pub version: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStore {
    accelerator: Option<AcceleratorId>,
    entries: BTreeMap<ShapeKey, Arc<[u8]>>,
}

impl EngineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn accelerator(&self) -> Option<&AcceleratorId> {
        self.accelerator.as_ref()
    }

    /// Adds or replaces the engine for `key`. All engines in one store come
    /// from the same accelerator.
    pub fn insert(
        &mut self,
        accelerator: &AcceleratorId,
        key: ShapeKey,
        engine: Arc<[u8]>,
    ) -> Result<(), ArtifactError> {
        match &self.accelerator {
            Some(existing) if existing != accelerator => {
                return Err(ArtifactError::AcceleratorMismatch {
                    stored: existing.clone(),
                    expected: accelerator.clone(),
                })
            }
            Some(_) => {}
            None => self.accelerator = Some(accelerator.clone()),
        }
        self.entries.insert(key, engine);
        Ok(())
    }

    pub fn get(&self, key: &ShapeKey) -> Option<&Arc<[u8]>> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ShapeKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ShapeKey, &Arc<[u8]>)> {
        self.entries.iter()
    }

    pub fn encode(&self) -> Result<Vec<u8>, ArtifactError> {
        let Some(accelerator) = &self.accelerator else {
            return Ok(Vec::new());
        };
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let body = EngineStoreBody {
            accelerator: accelerator.clone(),
            entries: self
                .entries
                .iter()
                .map(|(key, bytes)| (key.clone(), bytes.to_vec()))
                .collect(),
        };
        let body = bincode::serialize(&body)
            .map_err(|source| ArtifactError::Bincode { blob: BLOB, source })?;

        let mut out = Vec::with_capacity(28 + body.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend_from_slice(&body);
        out.extend_from_slice(&fnv1a_hash(&body).to_le_bytes());
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ArtifactError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
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
        let body_len = usize::try_from(reader.u64()?).map_err(|_| ArtifactError::Truncated {
            blob: BLOB,
            detail: "body length overflows".to_string(),
        })?;
        let body = reader.take(body_len)?;
        let stored = reader.u64()?;
        let trailing = reader.rest();
        if !trailing.is_empty() {
            return Err(ArtifactError::Malformed {
                blob: BLOB,
                detail: format!("{} trailing bytes after the checksum", trailing.len()),
            });
        }
        let computed = fnv1a_hash(body);
        if stored != computed {
            return Err(ArtifactError::ChecksumMismatch { stored, computed });
        }

        let body: EngineStoreBody = bincode::deserialize(body)
            .map_err(|source| ArtifactError::Bincode { blob: BLOB, source })?;
        let mut store = Self::default();
        for (key, engine) in body.entries {
            if store.entries.contains_key(&key) {
                return Err(ArtifactError::Malformed {
                    blob: BLOB,
                    detail: format!("duplicate engine for {key}"),
                });
            }
            store.insert(&body.accelerator, key, Arc::from(engine))?;
        }
        Ok(store)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EngineStoreBody {
    accelerator: AcceleratorId,
    entries: Vec<(ShapeKey, Vec<u8>)>,
}

fn fnv1a_hash(bytes: &[u8]) -> u64 {
    let mut hash = FNV1A_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

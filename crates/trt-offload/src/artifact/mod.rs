//! Compiled artifact: graph descriptor, parameter blob and engine store.
//!
//! The three blobs are independently encoded and independently loadable.
//! Any structural failure aborts the whole load.

mod descriptor;
mod engine_store;
mod params;

use std::fs;
use std::io;
use std::path::Path;

use log::info;
use thiserror::Error;

use crate::ir::{Graph, TopologyError};
use crate::partition::{AcceptedGraph, CompilerTag};
use crate::shape_key::ShapeKey;

pub use descriptor::{decode_descriptor, encode_descriptor};
pub use engine_store::{AcceleratorId, EngineStore};
pub use params::{check_param_bindings, decode_params, encode_params, ParamBindingError, ParamBlob};

pub const GRAPH_FILE: &str = "graph.json";
pub const PARAMS_FILE: &str = "params.bin";
pub const ENGINES_FILE: &str = "engines.bin";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{blob}: invalid magic header")]
    BadMagic { blob: &'static str },
    #[error("{blob}: unsupported version {version}")]
    UnsupportedVersion { blob: &'static str, version: u32 },
    #[error("{blob}: truncated: {detail}")]
    Truncated { blob: &'static str, detail: String },
    #[error("{blob}: {detail}")]
    Malformed { blob: &'static str, detail: String },
    #[error("engine store checksum mismatch: stored {stored:#018x}, computed {computed:#018x}")]
    ChecksumMismatch { stored: u64, computed: u64 },
    #[error("graph descriptor is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{blob}: bincode decode failed: {source}")]
    Bincode {
        blob: &'static str,
        source: bincode::Error,
    },
    #[error("graph descriptor carries no accelerator compiler tag")]
    MissingCompilerTag,
    #[error("graph descriptor topology: {0}")]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    ParamBinding(#[from] ParamBindingError),
    #[error(
        "engine store was built by {} v{}, runtime uses {} v{}",
        .stored.name, .stored.version, .expected.name, .expected.version
    )]
    AcceleratorMismatch {
        stored: AcceleratorId,
        expected: AcceleratorId,
    },
    #[error("persisted engine for {shape_key} could not be loaded: {detail}")]
    EngineDecode { shape_key: ShapeKey, detail: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The three persisted blobs of a compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedArtifact {
    pub graph: Vec<u8>,
    pub params: Vec<u8>,
    pub engines: Vec<u8>,
}

/// Lowered form of an accepted graph.
///
/// `graph` and `params` are fixed at compile time; the engine store only
/// grows as new shape keys are built.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledArtifact {
    graph: Graph,
    params: ParamBlob,
    engine_store: EngineStore,
}

impl CompiledArtifact {
    /// Lowers an accepted graph with an empty engine store.
    pub fn from_accepted(
        accepted: AcceptedGraph,
        params: ParamBlob,
    ) -> Result<Self, ParamBindingError> {
        check_param_bindings(accepted.graph(), &params)?;
        Ok(Self {
            graph: accepted.into_graph(),
            params,
            engine_store: EngineStore::new(),
        })
    }

    pub(crate) fn from_parts(graph: Graph, params: ParamBlob, engine_store: EngineStore) -> Self {
        Self {
            graph,
            params,
            engine_store,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn params(&self) -> &ParamBlob {
        &self.params
    }

    pub fn engine_store(&self) -> &EngineStore {
        &self.engine_store
    }

    pub fn tag(&self) -> Option<CompilerTag> {
        CompilerTag::from_entry(&self.graph.entry)
    }

    pub(crate) fn into_parts(self) -> (Graph, ParamBlob, EngineStore) {
        (self.graph, self.params, self.engine_store)
    }

    pub fn serialize(&self) -> Result<SerializedArtifact, ArtifactError> {
        Ok(SerializedArtifact {
            graph: encode_descriptor(&self.graph)?,
            params: encode_params(&self.params)?,
            engines: self.engine_store.encode()?,
        })
    }

    /// Empty `engine_bytes` means no engine has been built yet.
    pub fn deserialize(
        graph_bytes: &[u8],
        params_bytes: &[u8],
        engine_bytes: &[u8],
    ) -> Result<Self, ArtifactError> {
        let graph = decode_descriptor(graph_bytes)?;
        let params = decode_params(params_bytes)?;
        check_param_bindings(&graph, &params)?;
        let engine_store = EngineStore::decode(engine_bytes)?;
        Ok(Self {
            graph,
            params,
            engine_store,
        })
    }

    pub fn save_to_dir(&self, dir: impl AsRef<Path>) -> Result<(), ArtifactError> {
        let dir = dir.as_ref();
        let serialized = self.serialize()?;
        fs::create_dir_all(dir)?;
        fs::write(dir.join(GRAPH_FILE), &serialized.graph)?;
        fs::write(dir.join(PARAMS_FILE), &serialized.params)?;
        fs::write(dir.join(ENGINES_FILE), &serialized.engines)?;
        info!(
            "saved artifact '{}' to {} ({} persisted engines)",
            self.graph.entry.name,
            dir.display(),
            self.engine_store.len()
        );
        Ok(())
    }

    /// A missing engine file is read as an empty store.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let dir = dir.as_ref();
        let graph = fs::read(dir.join(GRAPH_FILE))?;
        let params = fs::read(dir.join(PARAMS_FILE))?;
        let engines = match fs::read(dir.join(ENGINES_FILE)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Self::deserialize(&graph, &params, &engines)
    }
}

//! Capability interface of the external execution engine.
//!
//! The engine internals are opaque here: the runtime only needs to build an
//! engine for a concrete shape key, move bytes in and out of engine-owned
//! buffers, and execute. Tests substitute a fake implementation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::ParamBlob;
use crate::ir::{DType, Graph};
use crate::shape_key::ShapeKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Upper bound on scratch memory an engine may reserve.
    pub max_workspace_bytes: u64,
    /// Allow engines to declare float16 bindings.
    pub allow_fp16: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_workspace_bytes: 1 << 30,
            allow_fp16: false,
        }
    }
}

/// Everything an accelerator needs to specialize the accepted graph for one
/// shape key.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub graph: &'a Graph,
    pub params: &'a ParamBlob,
    pub shape_key: &'a ShapeKey,
    pub config: &'a BuildConfig,
}

/// Declared layout of one engine input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub dtype: DType,
    pub dims: Vec<usize>,
}

impl Binding {
    pub fn byte_len(&self) -> usize {
        self.dims.iter().product::<usize>() * self.dtype.size_in_bytes()
    }
}

/// Builder diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("engine build exhausted resources: {0}")]
    ResourceExhausted(String),
    #[error("engine build does not support the graph: {0}")]
    Unsupported(String),
    #[error("engine build failed: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("invalid engine input: {0}")]
    InvalidInput(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("engine execution failed: {0}")]
    Internal(String),
}

pub trait Accelerator: Send + Sync {
    type Engine: Send + Sync + 'static;
    type Buffer: Send;

    fn name(&self) -> &str;

    /// Version of the engine format. Persisted engines from another version
    /// are refused.
    fn version(&self) -> u32;

    fn is_available(&self) -> bool {
        true
    }

    /// Builds an engine for one shape key. May block for a long time.
    fn build(&self, request: &BuildRequest<'_>) -> Result<Self::Engine, BuildError>;

    fn input_bindings<'e>(&self, engine: &'e Self::Engine) -> &'e [Binding];

    fn output_bindings<'e>(&self, engine: &'e Self::Engine) -> &'e [Binding];

    /// Copies host bytes already in the binding's dtype into an
    /// engine-owned staging buffer.
    fn stage_input(
        &self,
        engine: &Self::Engine,
        binding: usize,
        bytes: &[u8],
    ) -> Result<Self::Buffer, ExecutionError>;

    fn alloc_output(
        &self,
        engine: &Self::Engine,
        binding: usize,
    ) -> Result<Self::Buffer, ExecutionError>;

    fn execute(
        &self,
        engine: &Self::Engine,
        inputs: &[Self::Buffer],
        outputs: &mut [Self::Buffer],
    ) -> Result<(), ExecutionError>;

    fn read_output(
        &self,
        engine: &Self::Engine,
        buffer: &Self::Buffer,
    ) -> Result<Vec<u8>, ExecutionError>;

    /// Returns a buffer to the device. Never fails; engines are not affected.
    fn release(&self, buffer: Self::Buffer);

    /// Engines that cannot run concurrently with themselves return true; the
    /// runtime then serializes calls per engine.
    fn requires_serialized_execution(&self) -> bool {
        false
    }

    fn serialize_engine(&self, engine: &Self::Engine) -> Result<Vec<u8>, BuildError>;

    fn deserialize_engine(&self, bytes: &[u8]) -> Result<Self::Engine, BuildError>;
}

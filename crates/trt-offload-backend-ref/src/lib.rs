//! Host-memory reference accelerator.
//!
//! Builds a shape-specialized [`plan`](crate::plan) per shape key and runs it
//! with plain float32 kernels. Engines serialize with bincode, so persisted
//! engines are byte-identical across builds of the same graph and key.

mod kernels;
mod plan;

use std::sync::atomic::{AtomicUsize, Ordering};

use half::f16;
use log::debug;
use serde::{Deserialize, Serialize};
use trt_offload::ir::DType;
use trt_offload::{Accelerator, Binding, BuildError, BuildRequest, ExecutionError};

use plan::Plan;

pub const ACCELERATOR_NAME: &str = "reference";
const ENGINE_FORMAT_VERSION: u32 = 1;

/// Built engine: an execution plan specialized for one shape key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefEngine {
    format_version: u32,
    plan: Plan,
}

impl RefEngine {
    pub fn workspace_bytes(&self) -> u64 {
        self.plan.workspace_bytes
    }

    pub fn step_count(&self) -> usize {
        self.plan.steps.len()
    }
}

/// Host staging buffer holding bytes in its binding's dtype.
#[derive(Debug)]
pub struct RefBuffer {
    dtype: DType,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct RefAccelerator {
    live_buffers: AtomicUsize,
}

impl RefAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers handed out and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::SeqCst)
    }

    fn new_buffer(&self, dtype: DType, bytes: Vec<u8>) -> RefBuffer {
        self.live_buffers.fetch_add(1, Ordering::SeqCst);
        RefBuffer { dtype, bytes }
    }
}

impl Accelerator for RefAccelerator {
    type Engine = RefEngine;
    type Buffer = RefBuffer;

    fn name(&self) -> &str {
        ACCELERATOR_NAME
    }

    fn version(&self) -> u32 {
        ENGINE_FORMAT_VERSION
    }

    fn build(&self, request: &BuildRequest<'_>) -> Result<RefEngine, BuildError> {
        let plan = plan::build_plan(request)?;
        debug!(
            "reference plan for {}: {} steps, {} workspace bytes",
            request.shape_key,
            plan.steps.len(),
            plan.workspace_bytes
        );
        Ok(RefEngine {
            format_version: ENGINE_FORMAT_VERSION,
            plan,
        })
    }

    fn input_bindings<'e>(&self, engine: &'e RefEngine) -> &'e [Binding] {
        &engine.plan.inputs
    }

    fn output_bindings<'e>(&self, engine: &'e RefEngine) -> &'e [Binding] {
        &engine.plan.outputs
    }

    fn stage_input(
        &self,
        engine: &RefEngine,
        binding: usize,
        bytes: &[u8],
    ) -> Result<RefBuffer, ExecutionError> {
        let binding = engine
            .plan
            .inputs
            .get(binding)
            .ok_or_else(|| ExecutionError::InvalidInput(format!("no input binding {binding}")))?;
        if bytes.len() != binding.byte_len() {
            return Err(ExecutionError::InvalidInput(format!(
                "input '{}' needs {} bytes, got {}",
                binding.name,
                binding.byte_len(),
                bytes.len()
            )));
        }
        Ok(self.new_buffer(binding.dtype, bytes.to_vec()))
    }

    fn alloc_output(&self, engine: &RefEngine, binding: usize) -> Result<RefBuffer, ExecutionError> {
        let binding = engine
            .plan
            .outputs
            .get(binding)
            .ok_or_else(|| ExecutionError::InvalidInput(format!("no output binding {binding}")))?;
        Ok(self.new_buffer(binding.dtype, vec![0u8; binding.byte_len()]))
    }

    fn execute(
        &self,
        engine: &RefEngine,
        inputs: &[RefBuffer],
        outputs: &mut [RefBuffer],
    ) -> Result<(), ExecutionError> {
        if inputs.len() != engine.plan.inputs.len() || outputs.len() != engine.plan.outputs.len() {
            return Err(ExecutionError::InvalidInput(format!(
                "engine takes {} inputs and {} outputs, got {} and {}",
                engine.plan.inputs.len(),
                engine.plan.outputs.len(),
                inputs.len(),
                outputs.len()
            )));
        }
        let decoded = inputs
            .iter()
            .map(|buffer| decode(buffer.dtype, &buffer.bytes))
            .collect::<Result<Vec<_>, _>>()?;
        let results = kernels::run_plan(&engine.plan, &decoded).map_err(ExecutionError::Internal)?;
        for (buffer, values) in outputs.iter_mut().zip(results) {
            let bytes = encode(buffer.dtype, &values)?;
            if bytes.len() != buffer.bytes.len() {
                return Err(ExecutionError::Internal(format!(
                    "output of {} bytes does not fit a {} byte buffer",
                    bytes.len(),
                    buffer.bytes.len()
                )));
            }
            buffer.bytes = bytes;
        }
        Ok(())
    }

    fn read_output(&self, _engine: &RefEngine, buffer: &RefBuffer) -> Result<Vec<u8>, ExecutionError> {
        Ok(buffer.bytes.clone())
    }

    fn release(&self, buffer: RefBuffer) {
        drop(buffer);
        self.live_buffers.fetch_sub(1, Ordering::SeqCst);
    }

    fn serialize_engine(&self, engine: &RefEngine) -> Result<Vec<u8>, BuildError> {
        bincode::serialize(engine).map_err(|err| BuildError::Internal(err.to_string()))
    }

    fn deserialize_engine(&self, bytes: &[u8]) -> Result<RefEngine, BuildError> {
        let engine: RefEngine =
            bincode::deserialize(bytes).map_err(|err| BuildError::Internal(err.to_string()))?;
        if engine.format_version != ENGINE_FORMAT_VERSION {
            return Err(BuildError::Internal(format!(
                "engine format version {} is not {ENGINE_FORMAT_VERSION}",
                engine.format_version
            )));
        }
        Ok(engine)
    }
}

fn decode(dtype: DType, bytes: &[u8]) -> Result<Vec<f32>, ExecutionError> {
    match dtype {
        DType::F32 => Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()),
        DType::F16 => Ok(bytes
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect()),
        other => Err(ExecutionError::InvalidInput(format!("{other} buffers unsupported"))),
    }
}

fn encode(dtype: DType, values: &[f32]) -> Result<Vec<u8>, ExecutionError> {
    match dtype {
        DType::F32 => Ok(values.iter().flat_map(|v| v.to_le_bytes()).collect()),
        DType::F16 => Ok(values
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_le_bytes())
            .collect()),
        other => Err(ExecutionError::Internal(format!("{other} buffers unsupported"))),
    }
}

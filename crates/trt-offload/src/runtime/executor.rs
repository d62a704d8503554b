//! Moves host tensors through an engine's bindings.

use half::f16;

use crate::accelerator::{Accelerator, Binding, ExecutionError};
use crate::ir::DType;
use crate::tensor::HostTensor;

/// Buffers handed out by the accelerator for one call. Released on drop, so
/// every exit path (including a failing `execute`) gives them back. The
/// engine itself is never touched.
struct StagingGuard<'a, A: Accelerator> {
    accelerator: &'a A,
    buffers: Vec<A::Buffer>,
}

impl<'a, A: Accelerator> StagingGuard<'a, A> {
    fn new(accelerator: &'a A, capacity: usize) -> Self {
        Self {
            accelerator,
            buffers: Vec::with_capacity(capacity),
        }
    }
}

impl<A: Accelerator> Drop for StagingGuard<'_, A> {
    fn drop(&mut self) {
        for buffer in self.buffers.drain(..) {
            self.accelerator.release(buffer);
        }
    }
}

pub struct Executor<'a, A: Accelerator> {
    accelerator: &'a A,
}

impl<'a, A: Accelerator> Executor<'a, A> {
    pub fn new(accelerator: &'a A) -> Self {
        Self { accelerator }
    }

    /// Runs `engine` on `inputs` and returns outputs in binding order, each
    /// converted to the matching entry of `output_dtypes`.
    pub fn run(
        &self,
        engine: &A::Engine,
        inputs: &[HostTensor],
        output_dtypes: &[DType],
    ) -> Result<Vec<HostTensor>, ExecutionError> {
        let input_bindings = self.accelerator.input_bindings(engine);
        let output_bindings = self.accelerator.output_bindings(engine);
        if inputs.len() != input_bindings.len() {
            return Err(ExecutionError::InvalidInput(format!(
                "engine expects {} inputs, got {}",
                input_bindings.len(),
                inputs.len()
            )));
        }
        if output_dtypes.len() != output_bindings.len() {
            return Err(ExecutionError::InvalidInput(format!(
                "engine produces {} outputs, caller expects {}",
                output_bindings.len(),
                output_dtypes.len()
            )));
        }

        let mut staged = StagingGuard::new(self.accelerator, inputs.len());
        for (index, (tensor, binding)) in inputs.iter().zip(input_bindings).enumerate() {
            if tensor.dims() != binding.dims.as_slice() {
                return Err(ExecutionError::InvalidInput(format!(
                    "input '{}' expects dims {:?}, got {:?}",
                    binding.name,
                    binding.dims,
                    tensor.dims()
                )));
            }
            let bytes = to_binding_bytes(tensor, binding)?;
            staged
                .buffers
                .push(self.accelerator.stage_input(engine, index, &bytes)?);
        }

        let mut outputs = StagingGuard::new(self.accelerator, output_bindings.len());
        for index in 0..output_bindings.len() {
            outputs
                .buffers
                .push(self.accelerator.alloc_output(engine, index)?);
        }

        self.accelerator
            .execute(engine, &staged.buffers, &mut outputs.buffers)?;
        drop(staged);

        let mut results = Vec::with_capacity(output_bindings.len());
        for ((buffer, binding), dtype) in outputs.buffers.iter().zip(output_bindings).zip(output_dtypes)
        {
            let bytes = self.accelerator.read_output(engine, buffer)?;
            results.push(from_binding_bytes(bytes, binding, *dtype)?);
        }
        Ok(results)
    }
}

fn to_binding_bytes(tensor: &HostTensor, binding: &Binding) -> Result<Vec<u8>, ExecutionError> {
    match (tensor.dtype(), binding.dtype) {
        (found, expected) if found == expected => Ok(tensor.bytes().to_vec()),
        (DType::F32, DType::F16) => Ok(f32_bytes_to_f16_bytes(tensor.bytes())),
        (found, expected) => Err(ExecutionError::InvalidInput(format!(
            "input '{}' is {found}; binding expects {expected}",
            binding.name
        ))),
    }
}

fn from_binding_bytes(
    bytes: Vec<u8>,
    binding: &Binding,
    dtype: DType,
) -> Result<HostTensor, ExecutionError> {
    let bytes = match (binding.dtype, dtype) {
        (found, expected) if found == expected => bytes,
        (DType::F16, DType::F32) => f16_bytes_to_f32_bytes(&bytes),
        (found, expected) => {
            return Err(ExecutionError::Internal(format!(
                "output '{}' is {found}; graph declares {expected}",
                binding.name
            )))
        }
    };
    HostTensor::new(dtype, binding.dims.clone(), bytes)
        .map_err(|err| ExecutionError::Internal(format!("output '{}': {err}", binding.name)))
}

fn f32_bytes_to_f16_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        out.extend_from_slice(&f16::from_f32(value).to_le_bytes());
    }
    out
}

fn f16_bytes_to_f32_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for chunk in bytes.chunks_exact(2) {
        let value = f16::from_le_bytes([chunk[0], chunk[1]]);
        out.extend_from_slice(&value.to_f32().to_le_bytes());
    }
    out
}

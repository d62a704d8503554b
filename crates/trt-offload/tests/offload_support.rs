#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trt_offload::artifact::ParamBlob;
use trt_offload::ir::{
    attrs, AttrValue, DType, DimSymbol, Dimension, Graph, GraphBuilder, OpKind, Shape, TensorSpec,
};
use trt_offload::{
    Accelerator, AcceptancePass, Binding, BuildError, BuildRequest, CompiledArtifact,
    ExecutionError, HostTensor, OracleConfig, Partition, ShapeKey,
};

pub fn f32_spec(dims: &[usize]) -> TensorSpec {
    TensorSpec::with_static(DType::F32, dims)
}

pub fn dynamic_batch_spec(dims: &[usize]) -> TensorSpec {
    let mut shape = vec![Dimension::Dynamic(DimSymbol::new("N"))];
    shape.extend(dims.iter().copied().map(Dimension::Static));
    TensorSpec::new(DType::F32, Shape::new(shape))
}

/// `x -> Conv2d(3x3, padding 1) -> Relu` on a 1x3x224x224 input.
pub fn conv_relu_graph() -> Graph {
    let mut builder = GraphBuilder::new("main");
    let x = builder.add_input("x", f32_spec(&[1, 3, 224, 224]));
    let w = builder.add_param("conv_w", f32_spec(&[8, 3, 3, 3]));
    let conv = builder.add_node(
        "conv",
        OpKind::Conv2d,
        vec![x, w],
        attrs([
            ("padding", AttrValue::I64Array(vec![1, 1])),
            ("strides", AttrValue::I64Array(vec![1, 1])),
        ]),
        f32_spec(&[1, 8, 224, 224]),
    );
    let relu = builder.add_node(
        "relu",
        OpKind::Relu,
        vec![conv.into()],
        Default::default(),
        f32_spec(&[1, 8, 224, 224]),
    );
    builder.finish(vec![relu])
}

pub fn conv_relu_params() -> ParamBlob {
    let mut params = ParamBlob::new();
    params.insert(
        "conv_w".to_string(),
        HostTensor::from_f32(vec![8, 3, 3, 3], &[0.5; 8 * 27]).unwrap(),
    );
    params
}

/// Single relu over `spec`.
pub fn relu_graph(spec: TensorSpec) -> Graph {
    let mut builder = GraphBuilder::new("relu_main");
    let x = builder.add_input("x", spec.clone());
    let relu = builder.add_node("relu", OpKind::Relu, vec![x], Default::default(), spec);
    builder.finish(vec![relu])
}

/// Accepts `graph` (with dynamic batch allowed) and lowers it with no params.
pub fn accepted_artifact(graph: Graph) -> CompiledArtifact {
    let pass = AcceptancePass::new(OracleConfig {
        allow_dynamic_batch: true,
        ..OracleConfig::default()
    });
    match pass.evaluate(graph) {
        Partition::Accepted(accepted) => {
            CompiledArtifact::from_accepted(accepted, ParamBlob::new()).unwrap()
        }
        Partition::Rejected(rejected) => panic!("graph rejected: {}", rejected.summary()),
    }
}

pub fn ramp(dims: &[usize]) -> HostTensor {
    let count = dims.iter().product::<usize>();
    let values = (0..count)
        .map(|i| (i % 7) as f32 - 3.0)
        .collect::<Vec<_>>();
    HostTensor::from_f32(dims.to_vec(), &values).unwrap()
}

pub fn relu_of(tensor: &HostTensor) -> Vec<f32> {
    tensor
        .to_f32_vec()
        .unwrap()
        .into_iter()
        .map(|v| v.max(0.0))
        .collect()
}

/// Engine that applies relu to its single input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeEngine {
    pub key: ShapeKey,
    pub inputs: Vec<Binding>,
    pub outputs: Vec<Binding>,
}

pub struct FakeBuffer(pub Vec<u8>);

/// Test double with build counting, slow builds and failure injection.
pub struct FakeAccelerator {
    pub version: u32,
    pub available: bool,
    pub serialized_execution: bool,
    pub build_delay: Duration,
    pub builds: AtomicUsize,
    pub builds_started: AtomicUsize,
    pub builds_held: Mutex<bool>,
    pub builds_resumed: Condvar,
    pub fail_next_builds: AtomicUsize,
    pub failing_keys: Mutex<HashSet<ShapeKey>>,
    pub fail_execute: AtomicBool,
    pub live_buffers: AtomicUsize,
    pub executing: AtomicUsize,
    pub max_concurrent: AtomicUsize,
}

impl Default for FakeAccelerator {
    fn default() -> Self {
        Self {
            version: 1,
            available: true,
            serialized_execution: false,
            build_delay: Duration::ZERO,
            builds: AtomicUsize::new(0),
            builds_started: AtomicUsize::new(0),
            builds_held: Mutex::new(false),
            builds_resumed: Condvar::new(),
            fail_next_builds: AtomicUsize::new(0),
            failing_keys: Mutex::new(HashSet::new()),
            fail_execute: AtomicBool::new(false),
            live_buffers: AtomicUsize::new(0),
            executing: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }
}

impl FakeAccelerator {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn live_buffers(&self) -> usize {
        self.live_buffers.load(Ordering::SeqCst)
    }

    pub fn fail_key(&self, key: ShapeKey) {
        self.failing_keys.lock().unwrap().insert(key);
    }

    pub fn clear_failures(&self) {
        self.failing_keys.lock().unwrap().clear();
    }

    /// Parks every build after it starts until `resume_builds`.
    pub fn hold_builds(&self) {
        *self.builds_held.lock().unwrap() = true;
    }

    pub fn resume_builds(&self) {
        *self.builds_held.lock().unwrap() = false;
        self.builds_resumed.notify_all();
    }

    pub fn wait_for_builds_started(&self, count: usize) {
        while self.builds_started.load(Ordering::SeqCst) < count {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Accelerator for FakeAccelerator {
    type Engine = FakeEngine;
    type Buffer = FakeBuffer;

    fn name(&self) -> &str {
        "fake"
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn build(&self, request: &BuildRequest<'_>) -> Result<FakeEngine, BuildError> {
        self.builds_started.fetch_add(1, Ordering::SeqCst);
        {
            let mut held = self.builds_held.lock().unwrap();
            while *held {
                held = self.builds_resumed.wait(held).unwrap();
            }
        }
        thread::sleep(self.build_delay);
        self.builds.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_keys.lock().unwrap().contains(request.shape_key);
        let fail_next = self
            .fail_next_builds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing || fail_next {
            return Err(BuildError::Internal(format!(
                "injected failure for {}",
                request.shape_key
            )));
        }
        let dims = request.shape_key.shapes()[0].clone();
        Ok(FakeEngine {
            key: request.shape_key.clone(),
            inputs: vec![Binding {
                name: "x".to_string(),
                dtype: DType::F32,
                dims: dims.clone(),
            }],
            outputs: vec![Binding {
                name: "relu".to_string(),
                dtype: DType::F32,
                dims,
            }],
        })
    }

    fn input_bindings<'e>(&self, engine: &'e FakeEngine) -> &'e [Binding] {
        &engine.inputs
    }

    fn output_bindings<'e>(&self, engine: &'e FakeEngine) -> &'e [Binding] {
        &engine.outputs
    }

    fn stage_input(
        &self,
        _engine: &FakeEngine,
        _binding: usize,
        bytes: &[u8],
    ) -> Result<FakeBuffer, ExecutionError> {
        self.live_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(FakeBuffer(bytes.to_vec()))
    }

    fn alloc_output(&self, engine: &FakeEngine, binding: usize) -> Result<FakeBuffer, ExecutionError> {
        self.live_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(FakeBuffer(vec![0u8; engine.outputs[binding].byte_len()]))
    }

    fn execute(
        &self,
        _engine: &FakeEngine,
        inputs: &[FakeBuffer],
        outputs: &mut [FakeBuffer],
    ) -> Result<(), ExecutionError> {
        let running = self.executing.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(running, Ordering::SeqCst);
        if self.serialized_execution {
            thread::sleep(Duration::from_millis(5));
        }
        let result = if self.fail_execute.load(Ordering::SeqCst) {
            Err(ExecutionError::Device("injected execution failure".to_string()))
        } else {
            outputs[0].0 = inputs[0]
                .0
                .chunks_exact(4)
                .flat_map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]).max(0.0).to_le_bytes())
                .collect();
            Ok(())
        };
        self.executing.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn read_output(&self, _engine: &FakeEngine, buffer: &FakeBuffer) -> Result<Vec<u8>, ExecutionError> {
        Ok(buffer.0.clone())
    }

    fn release(&self, _buffer: FakeBuffer) {
        self.live_buffers.fetch_sub(1, Ordering::SeqCst);
    }

    fn requires_serialized_execution(&self) -> bool {
        self.serialized_execution
    }

    fn serialize_engine(&self, engine: &FakeEngine) -> Result<Vec<u8>, BuildError> {
        bincode::serialize(engine).map_err(|err| BuildError::Internal(err.to_string()))
    }

    fn deserialize_engine(&self, bytes: &[u8]) -> Result<FakeEngine, BuildError> {
        bincode::deserialize(bytes).map_err(|err| BuildError::Internal(err.to_string()))
    }
}

#![allow(dead_code)]

use std::sync::Arc;

use trt_offload::ir::{attrs, AttrValue, Attrs, DType, DimSymbol, Dimension, Graph, GraphBuilder, OpKind, Shape, TensorSpec};
use trt_offload::{
    BuildConfig, CompileOutcome, CompiledArtifact, HostTensor, LazyEngineRuntime, OffloadCompiler,
    OffloadOptions, ParamBlob,
};
use trt_offload_backend_ref::RefAccelerator;

pub fn f32_spec(dims: &[usize]) -> TensorSpec {
    TensorSpec::with_static(DType::F32, dims)
}

pub fn batched(dims: &[usize]) -> TensorSpec {
    let mut shape = vec![Dimension::Dynamic(DimSymbol::new("N"))];
    shape.extend(dims.iter().copied().map(Dimension::Static));
    TensorSpec::new(DType::F32, Shape::new(shape))
}

pub fn tensor(dims: &[usize], values: &[f32]) -> HostTensor {
    HostTensor::from_f32(dims.to_vec(), values).unwrap()
}

pub fn ramp(dims: &[usize]) -> HostTensor {
    let count = dims.iter().product::<usize>();
    let values = (0..count)
        .map(|i| ((i % 11) as f32 - 5.0) * 0.25)
        .collect::<Vec<_>>();
    tensor(dims, &values)
}

/// 3x3 same-padded conv over 3 input channels, then relu.
pub fn conv_relu_graph(input: TensorSpec, weight_dims: &[usize], layout: &str, out_channels: usize) -> Graph {
    let mut output_shape = input.shape.dims().to_vec();
    output_shape[1] = Dimension::Static(out_channels);
    let output = TensorSpec::new(DType::F32, Shape::new(output_shape));

    let mut builder = GraphBuilder::new("conv_relu");
    let x = builder.add_input("x", input);
    let w = builder.add_param("conv_w", f32_spec(weight_dims));
    let conv = builder.add_node(
        "conv",
        OpKind::Conv2d,
        vec![x, w],
        attrs([
            ("padding", AttrValue::I64Array(vec![1, 1])),
            ("kernel_layout", AttrValue::String(layout.to_string())),
        ]),
        output.clone(),
    );
    let relu = builder.add_node("relu", OpKind::Relu, vec![conv.into()], Attrs::new(), output);
    builder.finish(vec![relu])
}

pub fn compile(graph: Graph, params: ParamBlob, options: &OffloadOptions) -> CompiledArtifact {
    match OffloadCompiler::new(options)
        .compile(&RefAccelerator::new(), graph, params)
        .unwrap()
    {
        CompileOutcome::Offloaded(artifact) => artifact,
        CompileOutcome::Fallback { diagnostics, .. } => {
            panic!("graph fell back: {diagnostics:?}")
        }
        CompileOutcome::Skipped { reason, .. } => panic!("compile skipped: {reason}"),
    }
}

pub fn runtime(artifact: CompiledArtifact, config: BuildConfig) -> LazyEngineRuntime<RefAccelerator> {
    LazyEngineRuntime::new(Arc::new(RefAccelerator::new()), artifact, config).unwrap()
}

pub fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len());
    for (index, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {index}: {a} vs {e} (tolerance {tolerance})"
        );
    }
}

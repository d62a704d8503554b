mod offload_support;

use std::sync::Arc;

use offload_support::{conv_relu_graph, conv_relu_params, f32_spec, ramp, FakeAccelerator};
use trt_offload::artifact::ParamBindingError;
use trt_offload::ir::{Attrs, GraphBuilder, NodeId, OpKind, TopologyError};
use trt_offload::{
    CompileError, CompileOutcome, LazyEngineRuntime, OffloadCompiler, OffloadOptions, ParamBlob,
};

#[test]
fn eligible_graph_is_offloaded_with_an_empty_engine_store() {
    let accelerator = FakeAccelerator::default();
    let outcome = OffloadCompiler::default()
        .compile(&accelerator, conv_relu_graph(), conv_relu_params())
        .unwrap();
    let CompileOutcome::Offloaded(artifact) = outcome else {
        panic!("expected an offloaded artifact");
    };
    assert!(artifact.engine_store().is_empty());
    assert!(artifact.params().contains_key("conv_w"));
    assert!(artifact.tag().is_some_and(|tag| tag.routes_to_accelerator()));
    assert_eq!(accelerator.builds(), 0);
}

#[test]
fn rejected_graph_falls_back_with_diagnostics() {
    let mut builder = GraphBuilder::new("main");
    let x = builder.add_input("x", f32_spec(&[1, 4]));
    let node = builder.add_node(
        "CustomOp_node",
        OpKind::Custom("CustomOp".to_string()),
        vec![x],
        Attrs::new(),
        f32_spec(&[1, 4]),
    );
    let graph = builder.finish(vec![node]);

    let outcome = OffloadCompiler::default()
        .compile(&FakeAccelerator::default(), graph.clone(), ParamBlob::new())
        .unwrap();
    match outcome {
        CompileOutcome::Fallback {
            graph: returned,
            diagnostics,
        } => {
            assert_eq!(returned, graph);
            assert_eq!(diagnostics.len(), 1);
            assert_eq!(diagnostics[0].reason, "unregistered operator");
        }
        other => panic!("expected fallback, got {other:?}"),
    }
}

#[test]
fn unavailable_accelerator_skips_offload() {
    let accelerator = FakeAccelerator {
        available: false,
        ..FakeAccelerator::default()
    };
    let graph = conv_relu_graph();
    let outcome = OffloadCompiler::default()
        .compile(&accelerator, graph.clone(), conv_relu_params())
        .unwrap();
    match outcome {
        CompileOutcome::Skipped {
            graph: returned,
            reason,
        } => {
            assert_eq!(returned, graph);
            assert_eq!(reason, "accelerator 'fake' is unavailable");
        }
        other => panic!("expected skip, got {other:?}"),
    }
}

#[test]
fn missing_weights_fail_lowering() {
    let err = OffloadCompiler::default()
        .compile(&FakeAccelerator::default(), conv_relu_graph(), ParamBlob::new())
        .unwrap_err();
    assert_eq!(
        err,
        CompileError::ParamBinding(ParamBindingError::Missing("conv_w".to_string()))
    );
}

#[test]
fn malformed_graph_is_an_error_not_a_fallback() {
    let mut builder = GraphBuilder::new("main");
    let x = builder.add_input("x", f32_spec(&[1, 4]));
    builder.add_node("relu", OpKind::Relu, vec![x], Attrs::new(), f32_spec(&[1, 4]));
    let graph = builder.finish(vec![NodeId(7)]);

    let err = OffloadCompiler::default()
        .compile(&FakeAccelerator::default(), graph, ParamBlob::new())
        .unwrap_err();
    assert_eq!(err, CompileError::Topology(TopologyError::UnknownOutput(7)));
}

#[test]
fn options_drive_the_oracle() {
    let options = OffloadOptions::from_json_str(r#"{"oracle": {"allow_dynamic_batch": true}}"#).unwrap();
    let graph = offload_support::relu_graph(offload_support::dynamic_batch_spec(&[3]));

    let strict = OffloadCompiler::default()
        .compile(&FakeAccelerator::default(), graph.clone(), ParamBlob::new())
        .unwrap();
    assert!(!strict.is_offloaded());

    let relaxed = OffloadCompiler::new(&options)
        .compile(&FakeAccelerator::default(), graph, ParamBlob::new())
        .unwrap();
    let CompileOutcome::Offloaded(artifact) = relaxed else {
        panic!("dynamic batch relu should be offloaded when allowed");
    };

    let runtime =
        LazyEngineRuntime::new(Arc::new(FakeAccelerator::default()), artifact, options.build).unwrap();
    let outputs = runtime.execute(&[ramp(&[6, 3])]).unwrap();
    assert_eq!(outputs[0].dims(), &[6, 3]);
}

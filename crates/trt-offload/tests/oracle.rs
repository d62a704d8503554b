mod offload_support;

use std::thread;

use offload_support::{dynamic_batch_spec, f32_spec};
use trt_offload::ir::{attrs, AttrValue, Attrs, DType, DimSymbol, Dimension, Graph, GraphBuilder, Input, OpKind, Shape, TensorSpec};
use trt_offload::{EligibilityVerdict, Oracle, OracleConfig};

/// Builds a graph whose last node is the one under test and returns the
/// verdict for it.
fn verdict_with(config: OracleConfig, graph: &Graph) -> EligibilityVerdict {
    let node = graph.nodes.last().unwrap();
    Oracle::new(config).check(graph, node)
}

fn verdict(graph: &Graph) -> EligibilityVerdict {
    verdict_with(OracleConfig::default(), graph)
}

fn reason(graph: &Graph) -> String {
    verdict(graph).reason.unwrap_or_default()
}

fn unary(op: OpKind, spec: TensorSpec, node_attrs: Attrs, output: TensorSpec) -> Graph {
    let mut builder = GraphBuilder::new("main");
    let x = builder.add_input("x", spec);
    let node = builder.add_node("node", op, vec![x], node_attrs, output);
    builder.finish(vec![node])
}

fn conv(node_attrs: Attrs, weight: TensorSpec, output: TensorSpec) -> Graph {
    let mut builder = GraphBuilder::new("main");
    let x = builder.add_input("x", f32_spec(&[1, 3, 32, 32]));
    let w = builder.add_param("w", weight);
    let node = builder.add_node("conv", OpKind::Conv2d, vec![x, w], node_attrs, output);
    builder.finish(vec![node])
}

fn default_conv(node_attrs: Attrs) -> Graph {
    conv(node_attrs, f32_spec(&[8, 3, 3, 3]), f32_spec(&[1, 8, 32, 32]))
}

#[test]
fn conv2d_with_constant_weights_is_supported() {
    let graph = default_conv(attrs([("padding", AttrValue::I64Array(vec![1]))]));
    assert_eq!(verdict(&graph), EligibilityVerdict::supported());
}

#[test]
fn conv2d_accepts_every_kernel_layout() {
    for (layout, dims) in [("OIHW", [8, 3, 3, 3]), ("HWIO", [3, 3, 3, 8]), ("HWOI", [3, 3, 8, 3])] {
        let graph = conv(
            attrs([
                ("kernel_layout", AttrValue::String(layout.to_string())),
                ("padding", AttrValue::I64Array(vec![1, 1, 1, 1])),
            ]),
            f32_spec(&dims),
            f32_spec(&[1, 8, 32, 32]),
        );
        assert!(verdict(&graph).is_supported(), "{layout}: {:?}", verdict(&graph));
    }
}

#[test]
fn conv2d_weight_from_another_node_is_rejected() {
    let mut builder = GraphBuilder::new("main");
    let x = builder.add_input("x", f32_spec(&[1, 3, 32, 32]));
    let w = builder.add_input("w", f32_spec(&[8, 3, 3, 3]));
    let w = builder.add_node("w_relu", OpKind::Relu, vec![w], Attrs::new(), f32_spec(&[8, 3, 3, 3]));
    let node = builder.add_node(
        "conv",
        OpKind::Conv2d,
        vec![x, w.into()],
        Attrs::new(),
        f32_spec(&[1, 8, 30, 30]),
    );
    let graph = builder.finish(vec![node]);
    assert_eq!(reason(&graph), "conv2d weight must be a constant parameter");
}

#[test]
fn conv2d_attribute_limits_name_the_violation() {
    let cases = [
        (
            attrs([("strides", AttrValue::I64Array(vec![32, 32]))]),
            "conv2d stride 32 outside supported range 1..=16",
        ),
        (
            attrs([("padding", AttrValue::I64Array(vec![1, 1, 1]))]),
            "conv2d padding must have 1, 2 or 4 values, found 3",
        ),
        (
            attrs([("kernel_layout", AttrValue::String("OHWI".to_string()))]),
            "kernel layout OHWI unsupported",
        ),
        (
            attrs([("data_layout", AttrValue::String("NHWC".to_string()))]),
            "data layout NHWC unsupported; expected NCHW",
        ),
        (
            attrs([("groups", AttrValue::I64(2))]),
            "groups 2 must divide input channels 3",
        ),
        (
            attrs([("padding", AttrValue::I64Array(vec![-1]))]),
            "negative conv2d padding unsupported",
        ),
    ];
    for (node_attrs, expected) in cases {
        assert_eq!(reason(&default_conv(node_attrs)), expected);
    }
}

#[test]
fn float64_is_rejected_by_dtype() {
    let spec = TensorSpec::with_static(DType::F64, &[1, 4]);
    let graph = unary(OpKind::Relu, spec.clone(), Attrs::new(), spec);
    assert_eq!(reason(&graph), "unsupported dtype: float64");
}

#[test]
fn rank_above_limit_is_rejected() {
    let spec = f32_spec(&[1, 1, 1, 1, 1]);
    let graph = unary(OpKind::Relu, spec.clone(), Attrs::new(), spec);
    assert_eq!(reason(&graph), "rank 5 exceeds the supported maximum of 4");
}

#[test]
fn dynamic_batch_requires_opt_in() {
    let spec = dynamic_batch_spec(&[4]);
    let graph = unary(OpKind::Relu, spec.clone(), Attrs::new(), spec);
    assert_eq!(reason(&graph), "dynamic batch dimension unsupported");

    let relaxed = OracleConfig {
        allow_dynamic_batch: true,
        ..OracleConfig::default()
    };
    assert!(verdict_with(relaxed, &graph).is_supported());
}

#[test]
fn shape_dependent_ops_reject_dynamic_batch_even_when_allowed() {
    let graph = unary(
        OpKind::Reshape,
        dynamic_batch_spec(&[2, 2]),
        attrs([("newshape", AttrValue::I64Array(vec![0, 4]))]),
        dynamic_batch_spec(&[4]),
    );
    let relaxed = OracleConfig {
        allow_dynamic_batch: true,
        ..OracleConfig::default()
    };
    assert_eq!(
        verdict_with(relaxed, &graph).reason.as_deref(),
        Some("dynamic batch dimension unsupported for Reshape")
    );
}

#[test]
fn dynamic_inner_dimension_is_rejected() {
    let spec = TensorSpec::new(
        DType::F32,
        Shape::new(vec![
            Dimension::Static(1),
            Dimension::Static(3),
            Dimension::Dynamic(DimSymbol::new("H")),
            Dimension::Static(4),
        ]),
    );
    let graph = unary(OpKind::Relu, spec.clone(), Attrs::new(), spec);
    assert_eq!(reason(&graph), "dynamic dimension at axis 2 unsupported");
}

#[test]
fn unknown_and_unlowered_operators() {
    let spec = f32_spec(&[1, 4]);
    let custom = unary(OpKind::Custom("CustomOp".to_string()), spec.clone(), Attrs::new(), spec.clone());
    assert_eq!(reason(&custom), "unregistered operator");

    let topk = unary(OpKind::TopK, spec.clone(), Attrs::new(), spec);
    assert_eq!(reason(&topk), "operator has no accelerator lowering");
}

#[test]
fn left_hand_broadcast_is_rejected() {
    let mut builder = GraphBuilder::new("main");
    let lhs = builder.add_input("lhs", f32_spec(&[1, 8, 1, 1]));
    let rhs = builder.add_input("rhs", f32_spec(&[1, 8, 4, 4]));
    let add = builder.add_node("add", OpKind::Add, vec![lhs, rhs], Attrs::new(), f32_spec(&[1, 8, 4, 4]));
    let graph = builder.finish(vec![add]);
    assert_eq!(reason(&graph), "operand broadcasting on the left-hand side unsupported");

    let mut builder = GraphBuilder::new("main");
    let lhs = builder.add_input("lhs", f32_spec(&[1, 8, 4, 4]));
    let rhs = builder.add_param("scale", f32_spec(&[8, 1, 1]));
    let mul = builder.add_node("mul", OpKind::Multiply, vec![lhs, rhs], Attrs::new(), f32_spec(&[1, 8, 4, 4]));
    let graph = builder.finish(vec![mul]);
    assert!(verdict(&graph).is_supported());
}

#[test]
fn bias_must_be_constant() {
    let mut builder = GraphBuilder::new("main");
    let x = builder.add_input("x", f32_spec(&[1, 8]));
    let b = builder.add_input("b", f32_spec(&[8]));
    let node = builder.add_node("bias", OpKind::BiasAdd, vec![x, b], Attrs::new(), f32_spec(&[1, 8]));
    let graph = builder.finish(vec![node]);
    assert_eq!(reason(&graph), "bias must be a constant parameter");
}

#[test]
fn batch_norm_statistics_are_checked() {
    let mut builder = GraphBuilder::new("main");
    let x = builder.add_input("x", f32_spec(&[1, 4, 8, 8]));
    let mut inputs = vec![x];
    for name in ["gamma", "beta", "mean", "var"] {
        inputs.push(builder.add_param(name, f32_spec(&[4])));
    }
    let node = builder.add_node("bn", OpKind::BatchNorm, inputs.clone(), Attrs::new(), f32_spec(&[1, 4, 8, 8]));
    let graph = builder.finish(vec![node]);
    assert!(verdict(&graph).is_supported());

    let mut graph = graph;
    graph.nodes[0].attrs.insert("axis".to_string(), AttrValue::I64(3));
    assert_eq!(
        reason(&graph),
        "batch_norm only supported on the channel axis, found axis 3"
    );
    graph.nodes[0].attrs.remove("axis");
    graph.nodes[0].inputs[4] = Input::GraphInput(0);
    assert_eq!(reason(&graph), "batch_norm moving_var must be a constant parameter");
}

#[test]
fn pooling_rules() {
    let pool = |extra: Vec<(&str, AttrValue)>| {
        let mut node_attrs = attrs([
            ("pool_size", AttrValue::I64Array(vec![2, 2])),
            ("strides", AttrValue::I64Array(vec![2, 2])),
        ]);
        node_attrs.extend(extra.into_iter().map(|(k, v)| (k.to_string(), v)));
        unary(OpKind::MaxPool2d, f32_spec(&[1, 3, 8, 8]), node_attrs, f32_spec(&[1, 3, 4, 4]))
    };
    assert!(verdict(&pool(vec![])).is_supported());
    assert_eq!(
        reason(&pool(vec![("ceil_mode", AttrValue::Bool(true))])),
        "ceil_mode pooling unsupported"
    );
    assert_eq!(
        reason(&pool(vec![("padding", AttrValue::I64Array(vec![0]))])),
        "pool padding must have 2 or 4 values, found 1"
    );
    assert_eq!(
        reason(&pool(vec![("pool_size", AttrValue::I64Array(vec![128, 128]))])),
        "pool size 128 outside supported range 1..=64"
    );

    let global = unary(OpKind::GlobalAvgPool2d, f32_spec(&[1, 3, 8, 8]), Attrs::new(), f32_spec(&[1, 3, 1, 1]));
    assert!(verdict(&global).is_supported());
}

#[test]
fn shape_operators_keep_the_batch_axis() {
    let mut builder = GraphBuilder::new("main");
    let a = builder.add_input("a", f32_spec(&[1, 4]));
    let b = builder.add_input("b", f32_spec(&[1, 4]));
    let cat = builder.add_node(
        "cat",
        OpKind::Concatenate,
        vec![a, b],
        attrs([("axis", AttrValue::I64(0))]),
        f32_spec(&[2, 4]),
    );
    let graph = builder.finish(vec![cat]);
    assert_eq!(reason(&graph), "concatenation along the batch axis unsupported");

    let reshape = unary(
        OpKind::Reshape,
        f32_spec(&[1, 2, 2]),
        attrs([("newshape", AttrValue::I64Array(vec![1, -2]))]),
        f32_spec(&[1, 4]),
    );
    assert_eq!(reason(&reshape), "reshape special value -2 unsupported");

    let transpose = unary(
        OpKind::Transpose,
        f32_spec(&[1, 2, 3]),
        attrs([("axes", AttrValue::I64Array(vec![1, 0, 2]))]),
        f32_spec(&[2, 1, 3]),
    );
    assert_eq!(reason(&transpose), "transpose that moves the batch axis unsupported");

    let softmax = unary(
        OpKind::Softmax,
        f32_spec(&[2, 3]),
        attrs([("axis", AttrValue::I64(0))]),
        f32_spec(&[2, 3]),
    );
    assert_eq!(reason(&softmax), "softmax over the batch axis unsupported");
}

#[test]
fn clip_bounds_must_be_ordered() {
    let spec = f32_spec(&[1, 4]);
    let graph = unary(
        OpKind::Clip,
        spec.clone(),
        attrs([("a_min", AttrValue::F64(6.0)), ("a_max", AttrValue::F64(0.0))]),
        spec,
    );
    assert_eq!(reason(&graph), "clip bounds must satisfy a_min < a_max, found 6 and 0");
}

#[test]
fn verdicts_are_deterministic_across_threads() {
    let graph = default_conv(attrs([("strides", AttrValue::I64Array(vec![32, 32]))]));
    let oracle = Oracle::default();
    let expected = oracle.check(&graph, &graph.nodes[0]);
    thread::scope(|scope| {
        let handles = (0..4)
            .map(|_| scope.spawn(|| oracle.check(&graph, &graph.nodes[0])))
            .collect::<Vec<_>>();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    });
}

mod offload_support;

use offload_support::{conv_relu_graph, f32_spec, relu_graph};
use trt_offload::ir::{AttrValue, Attrs, Graph, GraphBuilder, OpKind};
use trt_offload::partition::{ACCEPTED_ATTR, COMPILER_ATTR, NODE_COUNT_ATTR, ORACLE_VERSION_ATTR};
use trt_offload::{AcceptancePass, CompilerTag, Partition, COMPILER_ID};

fn with_custom_op() -> Graph {
    let mut builder = GraphBuilder::new("main");
    let x = builder.add_input("x", f32_spec(&[1, 8]));
    let relu = builder.add_node("relu", OpKind::Relu, vec![x], Attrs::new(), f32_spec(&[1, 8]));
    let custom = builder.add_node(
        "CustomOp_node",
        OpKind::Custom("CustomOp".to_string()),
        vec![relu.into()],
        Attrs::new(),
        f32_spec(&[1, 8]),
    );
    builder.finish(vec![custom])
}

#[test]
fn eligible_graph_is_tagged_and_otherwise_unchanged() {
    let graph = conv_relu_graph();
    let Partition::Accepted(accepted) = AcceptancePass::default().evaluate(graph.clone()) else {
        panic!("conv+relu should be accepted");
    };

    assert_eq!(accepted.tag(), &CompilerTag::accelerator());
    assert_eq!(accepted.tag().compiler_id, COMPILER_ID);

    let tagged = accepted.graph();
    let entry = &tagged.entry.attrs;
    assert_eq!(entry.get(COMPILER_ATTR), Some(&AttrValue::String("tensorrt".to_string())));
    assert_eq!(entry.get(ACCEPTED_ATTR), Some(&AttrValue::Bool(true)));
    assert_eq!(entry.get(NODE_COUNT_ATTR), Some(&AttrValue::I64(2)));
    assert!(entry.contains_key(ORACLE_VERSION_ATTR));

    assert_eq!(tagged.nodes, graph.nodes);
    assert_eq!(tagged.inputs, graph.inputs);
    assert_eq!(tagged.params, graph.params);
    assert_eq!(tagged.outputs, graph.outputs);
}

#[test]
fn one_unsupported_node_rejects_the_whole_graph() {
    let graph = with_custom_op();
    let Partition::Rejected(rejected) = AcceptancePass::default().evaluate(graph.clone()) else {
        panic!("custom operator should reject the graph");
    };

    let reasons = rejected
        .reasons
        .iter()
        .map(|reason| reason.as_tuple())
        .collect::<Vec<_>>();
    assert_eq!(reasons, vec![("CustomOp_node", "CustomOp", "unregistered operator")]);
    assert_eq!(rejected.graph, graph);
    assert!(CompilerTag::from_entry(&rejected.graph.entry).is_none());
    assert_eq!(
        rejected.summary(),
        "CustomOp_node (CustomOp): unregistered operator"
    );
}

#[test]
fn every_unsupported_node_is_reported_in_graph_order() {
    let mut builder = GraphBuilder::new("main");
    let x = builder.add_input("x", f32_spec(&[1, 8]));
    let topk = builder.add_node("topk", OpKind::TopK, vec![x.clone()], Attrs::new(), f32_spec(&[1, 8]));
    let relu = builder.add_node("relu", OpKind::Relu, vec![topk.into()], Attrs::new(), f32_spec(&[1, 8]));
    let custom = builder.add_node(
        "custom",
        OpKind::Custom("Mystery".to_string()),
        vec![relu.into()],
        Attrs::new(),
        f32_spec(&[1, 8]),
    );
    let graph = builder.finish(vec![custom]);

    let Partition::Rejected(rejected) = AcceptancePass::default().evaluate(graph) else {
        panic!("graph should be rejected");
    };
    let names = rejected
        .reasons
        .iter()
        .map(|reason| reason.node.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["topk", "custom"]);
    assert_eq!(rejected.reasons[0].reason, "operator has no accelerator lowering");
}

#[test]
fn graph_without_nodes_is_accepted() {
    let graph = GraphBuilder::new("empty").finish(Vec::new());
    let partition = AcceptancePass::default().evaluate(graph);
    assert!(partition.is_accepted());
}

#[test]
fn evaluation_is_repeatable() {
    let pass = AcceptancePass::default();
    let first = pass.evaluate(with_custom_op());
    let second = pass.evaluate(with_custom_op());
    assert_eq!(first, second);

    let first = pass.evaluate(relu_graph(f32_spec(&[2, 4])));
    let second = pass.evaluate(relu_graph(f32_spec(&[2, 4])));
    assert_eq!(first, second);
    assert!(first.is_accepted());
}

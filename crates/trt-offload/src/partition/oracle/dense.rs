use crate::ir::OpKind;

use super::{normalize_axis, NodeCtx, RuleResult};

pub(super) fn check(cx: &NodeCtx<'_>) -> RuleResult {
    cx.expect_arity(2)?;
    match cx.node.op {
        OpKind::BiasAdd => check_bias_add(cx),
        _ => check_dense(cx),
    }
}

/// `data [N, K] x weight [units, K] -> [N, units]`.
fn check_dense(cx: &NodeCtx<'_>) -> RuleResult {
    let data = cx.operand(0)?;
    let weight = cx.constant_operand(1, "dense weight")?;
    if data.rank() != 2 {
        return Err(format!("dense input must be rank 2, found rank {}", data.rank()));
    }
    if weight.rank() != 2 {
        return Err(format!(
            "dense weight must be rank 2, found rank {}",
            weight.rank()
        ));
    }
    let data_k = data.shape.dim(1).and_then(|dim| dim.as_static());
    let weight_k = weight.shape.dim(1).and_then(|dim| dim.as_static());
    if data_k != weight_k {
        return Err(format!(
            "dense reduction extents differ: input {} vs weight {}",
            data.shape, weight.shape
        ));
    }
    Ok(())
}

fn check_bias_add(cx: &NodeCtx<'_>) -> RuleResult {
    let data = cx.operand(0)?;
    let bias = cx.constant_operand(1, "bias")?;
    if bias.rank() != 1 {
        return Err(format!("bias must be rank 1, found rank {}", bias.rank()));
    }
    let axis = cx.i64_or("axis", 1)?;
    let Some(axis) = normalize_axis(axis, data.rank()) else {
        return Err(format!("bias axis {axis} out of range for rank {}", data.rank()));
    };
    if axis != 1 {
        return Err(format!("bias_add only supported on the channel axis, found axis {axis}"));
    }
    let channels = data.shape.dim(1).and_then(|dim| dim.as_static());
    if channels != bias.shape.dim(0).and_then(|dim| dim.as_static()) {
        return Err(format!(
            "bias shape {} does not match channel extent of {}",
            bias.shape, data.shape
        ));
    }
    Ok(())
}

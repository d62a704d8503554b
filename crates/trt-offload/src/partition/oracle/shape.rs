use std::collections::BTreeSet;

use crate::ir::OpKind;

use super::{normalize_axis, NodeCtx, RuleResult};

pub(super) fn check(cx: &NodeCtx<'_>) -> RuleResult {
    match cx.node.op {
        OpKind::Reshape => check_reshape(cx),
        OpKind::BatchFlatten => {
            cx.expect_arity(1)?;
            let data = cx.operand(0)?;
            if data.rank() < 2 {
                return Err(format!(
                    "batch_flatten input must be at least rank 2, found rank {}",
                    data.rank()
                ));
            }
            Ok(())
        }
        OpKind::Squeeze => check_squeeze(cx),
        OpKind::Concatenate => check_concatenate(cx),
        OpKind::Pad => check_pad(cx),
        _ => check_transpose(cx),
    }
}

/// `newshape` may use `0` (copy the input extent) and a single `-1`
/// (inferred); the composite special values are not lowered.
fn check_reshape(cx: &NodeCtx<'_>) -> RuleResult {
    cx.expect_arity(1)?;
    let newshape = cx
        .node
        .attr_i64_array("newshape")
        .ok_or_else(|| "reshape requires a newshape attribute".to_string())?;
    if let Some(special) = newshape.iter().find(|value| **value < -1) {
        return Err(format!("reshape special value {special} unsupported"));
    }
    if newshape.iter().filter(|value| **value == -1).count() > 1 {
        return Err("reshape may infer at most one dimension".to_string());
    }
    let input = cx.operand(0)?;
    if input.shape.dim(0) != cx.output().shape.dim(0) {
        return Err("reshape may not change the batch dimension".to_string());
    }
    if input.element_count() != cx.output().element_count() {
        return Err(format!(
            "reshape from {} to {} changes the element count",
            input.shape,
            cx.output().shape
        ));
    }
    Ok(())
}

fn check_squeeze(cx: &NodeCtx<'_>) -> RuleResult {
    cx.expect_arity(1)?;
    let data = cx.operand(0)?;
    let axes = cx
        .node
        .attr_i64_array("axis")
        .ok_or_else(|| "squeeze without explicit axes unsupported".to_string())?;
    for axis in axes {
        let Some(resolved) = normalize_axis(*axis, data.rank()) else {
            return Err(format!("squeeze axis {axis} out of range for rank {}", data.rank()));
        };
        if resolved == 0 {
            return Err("squeeze of the batch axis unsupported".to_string());
        }
        if data.shape.dim(resolved).and_then(|dim| dim.as_static()) != Some(1) {
            return Err(format!("squeeze axis {axis} does not have extent 1"));
        }
    }
    Ok(())
}

fn check_concatenate(cx: &NodeCtx<'_>) -> RuleResult {
    if cx.node.inputs.is_empty() {
        return Err("concatenate requires at least one operand".to_string());
    }
    let rank = cx.output().rank();
    let axis = cx.i64_or("axis", 0)?;
    let Some(axis) = normalize_axis(axis, rank) else {
        return Err(format!("concatenate axis {axis} out of range for rank {rank}"));
    };
    if axis == 0 {
        return Err("concatenation along the batch axis unsupported".to_string());
    }
    for index in 0..cx.node.inputs.len() {
        let operand = cx.operand(index)?;
        if operand.rank() != rank {
            return Err(format!(
                "concatenate operand {index} has rank {}, expected {rank}",
                operand.rank()
            ));
        }
        for (dim_axis, (dim, out)) in operand
            .shape
            .dims()
            .iter()
            .zip(cx.output().shape.dims())
            .enumerate()
        {
            if dim_axis != axis && dim != out {
                return Err(format!(
                    "concatenate operand {index} disagrees with the output at axis {dim_axis}"
                ));
            }
        }
    }
    Ok(())
}

/// `pad_width` is a flat `[before_0, after_0, before_1, after_1, ...]` list.
fn check_pad(cx: &NodeCtx<'_>) -> RuleResult {
    cx.expect_arity(1)?;
    let data = cx.operand(0)?;
    let mode = cx.str_or("pad_mode", "constant")?;
    if mode != "constant" {
        return Err(format!("pad mode {mode} unsupported"));
    }
    let width = cx
        .node
        .attr_i64_array("pad_width")
        .ok_or_else(|| "pad requires a pad_width attribute".to_string())?;
    if width.len() != data.rank() * 2 {
        return Err(format!(
            "pad_width must have {} values for rank {}, found {}",
            data.rank() * 2,
            data.rank(),
            width.len()
        ));
    }
    if width.iter().any(|value| *value < 0) {
        return Err("negative padding unsupported".to_string());
    }
    if width.len() >= 2 && (width[0] != 0 || width[1] != 0) {
        return Err("padding the batch axis unsupported".to_string());
    }
    Ok(())
}

fn check_transpose(cx: &NodeCtx<'_>) -> RuleResult {
    cx.expect_arity(1)?;
    let data = cx.operand(0)?;
    let axes = cx
        .node
        .attr_i64_array("axes")
        .ok_or_else(|| "transpose requires an axes attribute".to_string())?;
    if axes.len() != data.rank() {
        return Err(format!(
            "transpose axes must name all {} axes, found {}",
            data.rank(),
            axes.len()
        ));
    }
    let mut seen = BTreeSet::new();
    for axis in axes {
        let Some(resolved) = normalize_axis(*axis, data.rank()) else {
            return Err(format!("transpose axis {axis} out of range for rank {}", data.rank()));
        };
        if !seen.insert(resolved) {
            return Err(format!("transpose axis {axis} repeated"));
        }
    }
    if !axes.is_empty() && normalize_axis(axes[0], data.rank()) != Some(0) {
        return Err("transpose that moves the batch axis unsupported".to_string());
    }
    Ok(())
}

use std::cmp::Ordering;

use crate::ir::{Dimension, OpKind, TensorSpec};

use super::{normalize_axis, NodeCtx, RuleResult};

pub(super) fn check(cx: &NodeCtx<'_>) -> RuleResult {
    match cx.node.op {
        OpKind::Add | OpKind::Multiply => check_binary(cx),
        OpKind::Clip => {
            cx.expect_arity(1)?;
            let a_min = cx.f64_or("a_min", f64::NEG_INFINITY)?;
            let a_max = cx.f64_or("a_max", f64::INFINITY)?;
            if a_min.partial_cmp(&a_max) != Some(Ordering::Less) {
                return Err(format!(
                    "clip bounds must satisfy a_min < a_max, found {a_min} and {a_max}"
                ));
            }
            check_same_shape(cx)
        }
        OpKind::Softmax => {
            cx.expect_arity(1)?;
            let data = cx.operand(0)?;
            let axis = cx.i64_or("axis", -1)?;
            match normalize_axis(axis, data.rank()) {
                None => Err(format!("softmax axis {axis} out of range for rank {}", data.rank())),
                Some(0) => Err("softmax over the batch axis unsupported".to_string()),
                Some(_) => check_same_shape(cx),
            }
        }
        _ => {
            cx.expect_arity(1)?;
            check_same_shape(cx)
        }
    }
}

fn check_same_shape(cx: &NodeCtx<'_>) -> RuleResult {
    let data = cx.operand(0)?;
    if data.shape != cx.output().shape {
        return Err(format!(
            "{} output shape {} differs from input shape {}",
            cx.node.op,
            cx.output().shape,
            data.shape
        ));
    }
    Ok(())
}

/// The accelerator broadcasts the right-hand operand only; the result must
/// keep the left-hand operand's shape.
fn check_binary(cx: &NodeCtx<'_>) -> RuleResult {
    cx.expect_arity(2)?;
    let lhs = cx.operand(0)?;
    let rhs = cx.operand(1)?;
    if lhs.shape != cx.output().shape || !broadcasts_into(rhs, lhs) {
        return Err("operand broadcasting on the left-hand side unsupported".to_string());
    }
    Ok(())
}

fn broadcasts_into(rhs: &TensorSpec, lhs: &TensorSpec) -> bool {
    if rhs.rank() > lhs.rank() {
        return false;
    }
    let offset = lhs.rank() - rhs.rank();
    rhs.shape
        .dims()
        .iter()
        .zip(&lhs.shape.dims()[offset..])
        .all(|(r, l)| match (r, l) {
            (Dimension::Static(1), _) => true,
            (r, l) => r == l,
        })
}

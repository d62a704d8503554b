use crate::ir::DType;

use super::{normalize_axis, NodeCtx, RuleResult};

const STATISTICS: [&str; 4] = ["gamma", "beta", "moving_mean", "moving_var"];

/// Inference-mode batch norm: `data, gamma, beta, moving_mean, moving_var`.
pub(super) fn check(cx: &NodeCtx<'_>) -> RuleResult {
    cx.expect_arity(5)?;
    let data = cx.operand(0)?;
    let axis = cx.i64_or("axis", 1)?;
    if normalize_axis(axis, data.rank()) != Some(1) {
        return Err(format!(
            "batch_norm only supported on the channel axis, found axis {axis}"
        ));
    }
    let epsilon = cx.f64_or("epsilon", 1e-5)?;
    if epsilon.is_nan() || epsilon <= 0.0 {
        return Err(format!("batch_norm epsilon must be positive, found {epsilon}"));
    }
    let channels = data.shape.dim(1).and_then(|dim| dim.as_static());
    for (offset, name) in STATISTICS.iter().enumerate() {
        let what = format!("batch_norm {name}");
        let spec = cx.constant_operand(offset + 1, &what)?;
        if spec.rank() != 1 {
            return Err(format!("{what} must be rank 1, found rank {}", spec.rank()));
        }
        if spec.dtype != DType::F32 {
            return Err(format!("{what} must be float32, found {}", spec.dtype));
        }
        if spec.shape.dim(0).and_then(|dim| dim.as_static()) != channels {
            return Err(format!(
                "{what} shape {} does not match channel extent of {}",
                spec.shape, data.shape
            ));
        }
    }
    Ok(())
}

use crate::ir::window::{expand_pair, expand_padding_2d};
use crate::ir::OpKind;

use super::{NodeCtx, RuleResult};

pub(super) fn check(cx: &NodeCtx<'_>) -> RuleResult {
    cx.expect_arity(1)?;
    let data = cx.operand(0)?;
    if data.rank() != 4 {
        return Err(format!(
            "{} input must be rank 4, found rank {}",
            cx.node.op,
            data.rank()
        ));
    }
    let layout = cx.str_or("layout", "NCHW")?;
    if layout != "NCHW" {
        return Err(format!("data layout {layout} unsupported; expected NCHW"));
    }
    if cx.node.op == OpKind::GlobalAvgPool2d {
        return Ok(());
    }

    let pool_size = cx
        .node
        .attr_i64_array("pool_size")
        .ok_or_else(|| format!("{} requires a pool_size attribute", cx.node.op))?;
    let pool_size = expand_pair(pool_size).ok_or_else(|| {
        format!("pool_size must have 1 or 2 values, found {}", pool_size.len())
    })?;
    for extent in pool_size {
        if !(1..=cx.config.max_pool_size).contains(&extent) {
            return Err(format!(
                "pool size {extent} outside supported range 1..={}",
                cx.config.max_pool_size
            ));
        }
    }

    let strides = cx.i64_array_or("strides", &[1, 1])?;
    let strides = expand_pair(&strides)
        .ok_or_else(|| format!("pool strides must have 1 or 2 values, found {}", strides.len()))?;
    if strides.iter().any(|s| *s < 1) {
        return Err("pool strides must be positive".to_string());
    }

    let padding = cx.i64_array_or("padding", &[0, 0])?;
    if padding.len() != 2 && padding.len() != 4 {
        return Err(format!(
            "pool padding must have 2 or 4 values, found {}",
            padding.len()
        ));
    }
    let padding = expand_padding_2d(&padding)
        .ok_or_else(|| "pool padding must have 2 or 4 values".to_string())?;
    if padding.iter().any(|p| *p < 0) {
        return Err("negative pool padding unsupported".to_string());
    }
    if padding[0] >= pool_size[0]
        || padding[2] >= pool_size[0]
        || padding[1] >= pool_size[1]
        || padding[3] >= pool_size[1]
    {
        return Err("pool padding must be smaller than the window".to_string());
    }

    if cx.bool_or("ceil_mode", false)? {
        return Err("ceil_mode pooling unsupported".to_string());
    }
    Ok(())
}

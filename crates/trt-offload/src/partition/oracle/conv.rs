use crate::ir::window::{expand_pair, expand_padding_2d};
use crate::ir::DType;

use super::{NodeCtx, RuleResult};

const KERNEL_LAYOUTS: &[&str] = &["OIHW", "HWIO", "HWOI"];

pub(super) fn check(cx: &NodeCtx<'_>) -> RuleResult {
    cx.expect_arity(2)?;
    let data = cx.operand(0)?;
    let weight = cx.constant_operand(1, "conv2d weight")?;

    let data_layout = cx.str_or("data_layout", "NCHW")?;
    if data_layout != "NCHW" {
        return Err(format!("data layout {data_layout} unsupported; expected NCHW"));
    }
    let kernel_layout = cx.str_or("kernel_layout", "OIHW")?;
    if !KERNEL_LAYOUTS.contains(&kernel_layout) {
        return Err(format!("kernel layout {kernel_layout} unsupported"));
    }
    if data.rank() != 4 {
        return Err(format!("conv2d input must be rank 4, found rank {}", data.rank()));
    }
    if weight.rank() != 4 {
        return Err(format!(
            "conv2d weight must be rank 4, found rank {}",
            weight.rank()
        ));
    }
    if weight.dtype != DType::F32 {
        return Err(format!("conv2d weight must be float32, found {}", weight.dtype));
    }

    let strides = cx.i64_array_or("strides", &[1, 1])?;
    let strides = expand_pair(&strides)
        .ok_or_else(|| format!("conv2d strides must have 1 or 2 values, found {}", strides.len()))?;
    for stride in strides {
        if !(1..=cx.config.max_conv_stride).contains(&stride) {
            return Err(format!(
                "conv2d stride {stride} outside supported range 1..={}",
                cx.config.max_conv_stride
            ));
        }
    }

    let dilation = cx.i64_array_or("dilation", &[1, 1])?;
    let dilation = expand_pair(&dilation).ok_or_else(|| {
        format!("conv2d dilation must have 1 or 2 values, found {}", dilation.len())
    })?;
    if dilation.iter().any(|d| *d < 1) {
        return Err("conv2d dilation must be positive".to_string());
    }

    let padding = cx.i64_array_or("padding", &[0])?;
    let padding = expand_padding_2d(&padding).ok_or_else(|| {
        format!("conv2d padding must have 1, 2 or 4 values, found {}", padding.len())
    })?;
    if padding.iter().any(|p| *p < 0) {
        return Err("negative conv2d padding unsupported".to_string());
    }

    let groups = cx.i64_or("groups", 1)?;
    if groups < 1 {
        return Err(format!("conv2d groups must be positive, found {groups}"));
    }
    let groups = groups as usize;

    let Some(channels) = data.shape.dim(1).and_then(|dim| dim.as_static()) else {
        return Err("conv2d input channels must be static".to_string());
    };
    if channels % groups != 0 {
        return Err(format!(
            "groups {groups} must divide input channels {channels}"
        ));
    }
    let Some(weight_dims) = weight.shape.static_dims() else {
        return Err("conv2d weight shape must be static".to_string());
    };
    let (out_channels, in_per_group) = match kernel_layout {
        "OIHW" => (weight_dims[0], weight_dims[1]),
        "HWIO" => (weight_dims[3], weight_dims[2]),
        _ => (weight_dims[2], weight_dims[3]),
    };
    if in_per_group != channels / groups {
        return Err(format!(
            "conv2d weight expects {in_per_group} input channels per group, found {}",
            channels / groups
        ));
    }
    if out_channels % groups != 0 {
        return Err(format!(
            "groups {groups} must divide output channels {out_channels}"
        ));
    }
    Ok(())
}

//! Float32 kernels for every planned operator. All tensors are dense
//! row-major; 4-D tensors are NCHW.

use crate::plan::{Plan, PlanOp, Step, ValueRef};

pub(crate) fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

fn unravel_index(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (i, dim) in dims.iter().enumerate().rev() {
        coords[i] = index % *dim;
        index /= *dim;
    }
    coords
}

/// Evaluates the plan on decoded inputs and returns the outputs in binding
/// order.
pub(crate) fn run_plan(plan: &Plan, inputs: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, String> {
    let mut values: Vec<Vec<f32>> = Vec::with_capacity(plan.steps.len());
    for step in &plan.steps {
        let env = Env {
            plan,
            inputs,
            values: &values,
        };
        let result =
            run_step(&env, step).map_err(|detail| format!("step '{}': {detail}", step.name))?;
        values.push(result);
    }
    let env = Env {
        plan,
        inputs,
        values: &values,
    };
    Ok(plan
        .output_refs
        .iter()
        .map(|value| env.resolve(*value).to_vec())
        .collect())
}

struct Env<'a> {
    plan: &'a Plan,
    inputs: &'a [Vec<f32>],
    values: &'a [Vec<f32>],
}

impl<'a> Env<'a> {
    fn resolve(&self, value: ValueRef) -> &'a [f32] {
        match value {
            ValueRef::Input(index) => &self.inputs[index],
            ValueRef::Step(index) => &self.values[index],
            ValueRef::Const(index) => &self.plan.consts[index].values,
        }
    }

    fn operand(&self, step: &Step, index: usize) -> Result<(&'a [f32], &'a [usize]), String> {
        let value = *step
            .inputs
            .get(index)
            .ok_or_else(|| format!("missing operand {index}"))?;
        Ok((self.resolve(value), self.plan.dims_of(value)))
    }
}

fn run_step(env: &Env<'_>, step: &Step) -> Result<Vec<f32>, String> {
    let operand = |index: usize| env.operand(step, index);
    let (data, data_dims) = operand(0)?;

    let out = match &step.op {
        PlanOp::Conv2d {
            strides,
            padding,
            dilation,
            groups,
        } => {
            let (weight, weight_dims) = operand(1)?;
            conv2d(data, data_dims, weight, weight_dims, *strides, *padding, *dilation, *groups, &step.dims)
        }
        PlanOp::Dense => {
            let (weight, weight_dims) = operand(1)?;
            dense(data, data_dims, weight, weight_dims)
        }
        PlanOp::BiasAdd => {
            let (bias, _) = operand(1)?;
            per_channel(data, data_dims, |c, x| x + bias[c])
        }
        PlanOp::Add => {
            let (rhs, rhs_dims) = operand(1)?;
            broadcast_binary(data, data_dims, rhs, rhs_dims, |a, b| a + b)
        }
        PlanOp::Multiply => {
            let (rhs, rhs_dims) = operand(1)?;
            broadcast_binary(data, data_dims, rhs, rhs_dims, |a, b| a * b)
        }
        PlanOp::Relu => data.iter().map(|x| x.max(0.0)).collect(),
        PlanOp::Clip { min, max } => data.iter().map(|x| x.clamp(*min, *max)).collect(),
        PlanOp::Sigmoid => data.iter().map(|x| 1.0 / (1.0 + (-x).exp())).collect(),
        PlanOp::Tanh => data.iter().map(|x| x.tanh()).collect(),
        PlanOp::Identity => data.to_vec(),
        PlanOp::BatchNorm { epsilon } => {
            let (gamma, _) = operand(1)?;
            let (beta, _) = operand(2)?;
            let (mean, _) = operand(3)?;
            let (var, _) = operand(4)?;
            per_channel(data, data_dims, |c, x| {
                (x - mean[c]) / (var[c] + epsilon).sqrt() * gamma[c] + beta[c]
            })
        }
        PlanOp::MaxPool2d {
            window,
            strides,
            padding,
        } => pool2d(data, data_dims, *window, *strides, *padding, &step.dims, PoolKind::Max),
        PlanOp::AvgPool2d {
            window,
            strides,
            padding,
            count_include_pad,
        } => pool2d(
            data,
            data_dims,
            *window,
            *strides,
            *padding,
            &step.dims,
            PoolKind::Avg {
                count_include_pad: *count_include_pad,
            },
        ),
        PlanOp::GlobalAvgPool2d => {
            let plane = data_dims[2] * data_dims[3];
            data.chunks_exact(plane.max(1))
                .map(|chunk| chunk.iter().sum::<f32>() / plane as f32)
                .collect()
        }
        PlanOp::Softmax { axis } => softmax(data, data_dims, *axis),
        PlanOp::Concatenate { axis } => {
            let mut parts = Vec::with_capacity(step.inputs.len());
            for index in 0..step.inputs.len() {
                parts.push(operand(index)?);
            }
            concatenate(&parts, *axis, &step.dims)
        }
        PlanOp::Pad { width, value } => pad(data, data_dims, width, *value, &step.dims),
        PlanOp::Transpose { perm } => transpose(data, data_dims, perm, &step.dims),
    };

    let expected = step.dims.iter().product::<usize>();
    if out.len() != expected {
        return Err(format!(
            "produced {} elements for dims {:?}",
            out.len(),
            step.dims
        ));
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn conv2d(
    data: &[f32],
    data_dims: &[usize],
    weight: &[f32],
    weight_dims: &[usize],
    strides: [usize; 2],
    padding: [usize; 4],
    dilation: [usize; 2],
    groups: usize,
    out_dims: &[usize],
) -> Vec<f32> {
    let (batch, channels, height, width) = (data_dims[0], data_dims[1], data_dims[2], data_dims[3]);
    let (out_channels, in_per_group, kernel_h, kernel_w) =
        (weight_dims[0], weight_dims[1], weight_dims[2], weight_dims[3]);
    let (out_h, out_w) = (out_dims[2], out_dims[3]);
    let out_per_group = out_channels / groups;
    let mut out = vec![0.0f32; batch * out_channels * out_h * out_w];

    for n in 0..batch {
        for oc in 0..out_channels {
            let group = oc / out_per_group;
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = 0.0f32;
                    for ic in 0..in_per_group {
                        let c = group * in_per_group + ic;
                        for ky in 0..kernel_h {
                            let iy = (oy * strides[0] + ky * dilation[0]) as isize - padding[0] as isize;
                            if iy < 0 || iy >= height as isize {
                                continue;
                            }
                            for kx in 0..kernel_w {
                                let ix =
                                    (ox * strides[1] + kx * dilation[1]) as isize - padding[1] as isize;
                                if ix < 0 || ix >= width as isize {
                                    continue;
                                }
                                let d = ((n * channels + c) * height + iy as usize) * width + ix as usize;
                                let w = ((oc * in_per_group + ic) * kernel_h + ky) * kernel_w + kx;
                                acc += data[d] * weight[w];
                            }
                        }
                    }
                    out[((n * out_channels + oc) * out_h + oy) * out_w + ox] = acc;
                }
            }
        }
    }
    out
}

/// `[N, K] x [U, K]^T -> [N, U]`.
fn dense(data: &[f32], data_dims: &[usize], weight: &[f32], weight_dims: &[usize]) -> Vec<f32> {
    let (rows, inner) = (data_dims[0], data_dims[1]);
    let units = weight_dims[0];
    let mut out = vec![0.0f32; rows * units];
    for r in 0..rows {
        let row = &data[r * inner..(r + 1) * inner];
        for u in 0..units {
            let w = &weight[u * inner..(u + 1) * inner];
            out[r * units + u] = row.iter().zip(w).map(|(a, b)| a * b).sum();
        }
    }
    out
}

/// Applies `f(channel, x)` with the channel taken from axis 1.
fn per_channel(data: &[f32], dims: &[usize], f: impl Fn(usize, f32) -> f32) -> Vec<f32> {
    let channels = dims.get(1).copied().unwrap_or(1);
    let inner = dims.iter().skip(2).product::<usize>();
    data.iter()
        .enumerate()
        .map(|(index, x)| f((index / inner) % channels, *x))
        .collect()
}

/// Right-aligned broadcast of `rhs` into the shape of `lhs`.
fn broadcast_binary(
    lhs: &[f32],
    lhs_dims: &[usize],
    rhs: &[f32],
    rhs_dims: &[usize],
    f: impl Fn(f32, f32) -> f32,
) -> Vec<f32> {
    if lhs_dims == rhs_dims {
        return lhs.iter().zip(rhs).map(|(a, b)| f(*a, *b)).collect();
    }
    let offset = lhs_dims.len() - rhs_dims.len();
    let rhs_strides = compute_strides(rhs_dims);
    lhs.iter()
        .enumerate()
        .map(|(index, a)| {
            let coords = unravel_index(index, lhs_dims);
            let rhs_index = rhs_dims
                .iter()
                .enumerate()
                .map(|(axis, dim)| {
                    if *dim == 1 {
                        0
                    } else {
                        coords[axis + offset] * rhs_strides[axis]
                    }
                })
                .sum::<usize>();
            f(*a, rhs[rhs_index])
        })
        .collect()
}

#[derive(Clone, Copy)]
enum PoolKind {
    Max,
    Avg { count_include_pad: bool },
}

fn pool2d(
    data: &[f32],
    data_dims: &[usize],
    window: [usize; 2],
    strides: [usize; 2],
    padding: [usize; 4],
    out_dims: &[usize],
    kind: PoolKind,
) -> Vec<f32> {
    let (planes, height, width) = (data_dims[0] * data_dims[1], data_dims[2], data_dims[3]);
    let (out_h, out_w) = (out_dims[2], out_dims[3]);
    let mut out = vec![0.0f32; planes * out_h * out_w];
    for p in 0..planes {
        let plane = &data[p * height * width..(p + 1) * height * width];
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut max = f32::NEG_INFINITY;
                let mut sum = 0.0f32;
                let mut count = 0usize;
                for ky in 0..window[0] {
                    let iy = (oy * strides[0] + ky) as isize - padding[0] as isize;
                    for kx in 0..window[1] {
                        let ix = (ox * strides[1] + kx) as isize - padding[1] as isize;
                        if iy < 0 || ix < 0 || iy >= height as isize || ix >= width as isize {
                            if let PoolKind::Avg {
                                count_include_pad: true,
                            } = kind
                            {
                                count += 1;
                            }
                            continue;
                        }
                        let value = plane[iy as usize * width + ix as usize];
                        max = max.max(value);
                        sum += value;
                        count += 1;
                    }
                }
                out[(p * out_h + oy) * out_w + ox] = match kind {
                    PoolKind::Max => max,
                    PoolKind::Avg { .. } => sum / count.max(1) as f32,
                };
            }
        }
    }
    out
}

fn softmax(data: &[f32], dims: &[usize], axis: usize) -> Vec<f32> {
    let extent = dims[axis];
    let inner = dims[axis + 1..].iter().product::<usize>();
    let outer = dims[..axis].iter().product::<usize>();
    let mut out = vec![0.0f32; data.len()];
    for o in 0..outer {
        for i in 0..inner {
            let at = |k: usize| (o * extent + k) * inner + i;
            let max = (0..extent)
                .map(|k| data[at(k)])
                .fold(f32::NEG_INFINITY, f32::max);
            let mut total = 0.0f32;
            for k in 0..extent {
                let e = (data[at(k)] - max).exp();
                out[at(k)] = e;
                total += e;
            }
            for k in 0..extent {
                out[at(k)] /= total;
            }
        }
    }
    out
}

fn concatenate(parts: &[(&[f32], &[usize])], axis: usize, out_dims: &[usize]) -> Vec<f32> {
    let outer = out_dims[..axis].iter().product::<usize>();
    let inner = out_dims[axis + 1..].iter().product::<usize>();
    let mut out = Vec::with_capacity(out_dims.iter().product());
    for o in 0..outer {
        for (values, dims) in parts {
            let chunk = dims[axis] * inner;
            out.extend_from_slice(&values[o * chunk..(o + 1) * chunk]);
        }
    }
    out
}

fn pad(data: &[f32], dims: &[usize], width: &[[usize; 2]], value: f32, out_dims: &[usize]) -> Vec<f32> {
    let mut out = vec![value; out_dims.iter().product()];
    let out_strides = compute_strides(out_dims);
    for (index, x) in data.iter().enumerate() {
        let coords = unravel_index(index, dims);
        let target = coords
            .iter()
            .zip(width)
            .zip(&out_strides)
            .map(|((c, [before, _]), stride)| (c + before) * stride)
            .sum::<usize>();
        out[target] = *x;
    }
    out
}

/// Output axis `i` reads input axis `perm[i]`.
pub(crate) fn transpose(data: &[f32], dims: &[usize], perm: &[usize], out_dims: &[usize]) -> Vec<f32> {
    let input_strides = compute_strides(dims);
    (0..out_dims.iter().product::<usize>())
        .map(|index| {
            let out_coord = unravel_index(index, out_dims);
            let in_index = out_coord
                .iter()
                .enumerate()
                .map(|(axis, c)| c * input_strides[perm[axis]])
                .sum::<usize>();
            data[in_index]
        })
        .collect()
}

//! Shape-specialized execution plans.
//!
//! Building a plan resolves every attribute to concrete integers, infers
//! every intermediate extent from the shape key, and rewrites convolution
//! weights to OIHW. Execution then needs nothing but the plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use trt_offload::ir::window::{expand_pair, expand_padding_2d, window_output_extent};
use trt_offload::ir::{DType, Input, Node, OpKind};
use trt_offload::{Binding, BuildError, BuildRequest};

use crate::kernels::transpose;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ValueRef {
    Input(usize),
    Step(usize),
    Const(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ConstTensor {
    pub(crate) name: String,
    pub(crate) dims: Vec<usize>,
    pub(crate) values: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum PlanOp {
    Conv2d {
        strides: [usize; 2],
        padding: [usize; 4],
        dilation: [usize; 2],
        groups: usize,
    },
    Dense,
    BiasAdd,
    Add,
    Multiply,
    Relu,
    Clip { min: f32, max: f32 },
    Sigmoid,
    Tanh,
    /// Dropout at inference and the pure reshapes: data is passed through.
    Identity,
    BatchNorm { epsilon: f32 },
    MaxPool2d {
        window: [usize; 2],
        strides: [usize; 2],
        padding: [usize; 4],
    },
    AvgPool2d {
        window: [usize; 2],
        strides: [usize; 2],
        padding: [usize; 4],
        count_include_pad: bool,
    },
    GlobalAvgPool2d,
    Softmax { axis: usize },
    Concatenate { axis: usize },
    Pad { width: Vec<[usize; 2]>, value: f32 },
    Transpose { perm: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Step {
    pub(crate) name: String,
    pub(crate) op: PlanOp,
    pub(crate) inputs: Vec<ValueRef>,
    pub(crate) dims: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Plan {
    pub(crate) inputs: Vec<Binding>,
    pub(crate) outputs: Vec<Binding>,
    pub(crate) output_refs: Vec<ValueRef>,
    pub(crate) consts: Vec<ConstTensor>,
    pub(crate) steps: Vec<Step>,
    pub(crate) workspace_bytes: u64,
}

impl Plan {
    pub(crate) fn dims_of(&self, value: ValueRef) -> &[usize] {
        match value {
            ValueRef::Input(index) => &self.inputs[index].dims,
            ValueRef::Step(index) => &self.steps[index].dims,
            ValueRef::Const(index) => &self.consts[index].dims,
        }
    }
}

pub(crate) fn build_plan(request: &BuildRequest<'_>) -> Result<Plan, BuildError> {
    let graph = request.graph;
    let shapes = request.shape_key.shapes();
    if shapes.len() != graph.inputs.len() {
        return Err(BuildError::Internal(format!(
            "shape key has {} entries for {} graph inputs",
            shapes.len(),
            graph.inputs.len()
        )));
    }

    let binding_dtype = |declared: DType, what: &str| -> Result<DType, BuildError> {
        match declared {
            DType::F32 | DType::F16 if request.config.allow_fp16 => Ok(DType::F16),
            DType::F32 => Ok(DType::F32),
            DType::F16 => Ok(DType::F16),
            other => Err(BuildError::Unsupported(format!("{what} has dtype {other}"))),
        }
    };

    let mut builder = PlanBuilder {
        request,
        inputs: Vec::with_capacity(graph.inputs.len()),
        consts: Vec::new(),
        const_index: BTreeMap::new(),
        steps: Vec::with_capacity(graph.nodes.len()),
    };
    for (input, dims) in graph.inputs.iter().zip(shapes) {
        builder.inputs.push(Binding {
            name: input.name.clone(),
            dtype: binding_dtype(input.spec.dtype, &format!("input '{}'", input.name))?,
            dims: dims.clone(),
        });
    }
    for node in &graph.nodes {
        let step = builder.lower_node(node)?;
        builder.steps.push(step);
    }

    let mut outputs = Vec::with_capacity(graph.outputs.len());
    let mut output_refs = Vec::with_capacity(graph.outputs.len());
    for id in &graph.outputs {
        let node = graph
            .node(*id)
            .ok_or_else(|| BuildError::Internal(format!("graph output %{} is not a node", id.0)))?;
        let step = &builder.steps[id.index()];
        outputs.push(Binding {
            name: node.name.clone(),
            dtype: binding_dtype(node.output.dtype, &format!("output '{}'", node.name))?,
            dims: step.dims.clone(),
        });
        output_refs.push(ValueRef::Step(id.index()));
    }

    let elements = builder
        .steps
        .iter()
        .map(|step| step.dims.iter().product::<usize>())
        .chain(builder.consts.iter().map(|c| c.values.len()))
        .sum::<usize>();
    let workspace_bytes = (elements as u64).saturating_mul(4);
    if workspace_bytes > request.config.max_workspace_bytes {
        return Err(BuildError::ResourceExhausted(format!(
            "plan needs {workspace_bytes} workspace bytes, limit is {}",
            request.config.max_workspace_bytes
        )));
    }

    Ok(Plan {
        inputs: builder.inputs,
        outputs,
        output_refs,
        consts: builder.consts,
        steps: builder.steps,
        workspace_bytes,
    })
}

struct PlanBuilder<'a> {
    request: &'a BuildRequest<'a>,
    inputs: Vec<Binding>,
    consts: Vec<ConstTensor>,
    const_index: BTreeMap<(String, &'static str), usize>,
    steps: Vec<Step>,
}

impl PlanBuilder<'_> {
    fn dims(&self, value: ValueRef) -> &[usize] {
        match value {
            ValueRef::Input(index) => &self.inputs[index].dims,
            ValueRef::Step(index) => &self.steps[index].dims,
            ValueRef::Const(index) => &self.consts[index].dims,
        }
    }

    /// Registers a parameter, optionally re-laid out. The same parameter
    /// under the same layout is stored once.
    fn constant(&mut self, name: &str, layout: &'static str) -> Result<ValueRef, BuildError> {
        let key = (name.to_string(), layout);
        if let Some(index) = self.const_index.get(&key) {
            return Ok(ValueRef::Const(*index));
        }
        let tensor = self
            .request
            .params
            .get(name)
            .ok_or_else(|| BuildError::Internal(format!("parameter '{name}' is not bound")))?;
        let values = tensor
            .to_f32_vec()
            .map_err(|err| BuildError::Unsupported(format!("parameter '{name}': {err}")))?;
        let dims = tensor.dims().to_vec();
        let (dims, values) = match layout {
            "HWIO" => relayout(&dims, &values, &[3, 2, 0, 1]),
            "HWOI" => relayout(&dims, &values, &[2, 3, 0, 1]),
            _ => (dims, values),
        };
        let index = self.consts.len();
        self.consts.push(ConstTensor {
            name: name.to_string(),
            dims,
            values,
        });
        self.const_index.insert(key, index);
        Ok(ValueRef::Const(index))
    }

    fn operand(&mut self, node: &Node, index: usize, layout: &'static str) -> Result<ValueRef, BuildError> {
        match node.inputs.get(index) {
            Some(Input::GraphInput(i)) => Ok(ValueRef::Input(*i)),
            Some(Input::Node(id)) if id.index() < self.steps.len() => Ok(ValueRef::Step(id.index())),
            Some(Input::Param(name)) => self.constant(name, layout),
            Some(other) => Err(BuildError::Internal(format!(
                "node '{}' operand {other} is not available",
                node.name
            ))),
            None => Err(BuildError::Internal(format!(
                "node '{}' is missing operand {index}",
                node.name
            ))),
        }
    }

    fn lower_node(&mut self, node: &Node) -> Result<Step, BuildError> {
        let kernel_layout = match node.op {
            OpKind::Conv2d => match node.attr_str("kernel_layout").unwrap_or("OIHW") {
                "OIHW" => "OIHW",
                "HWIO" => "HWIO",
                "HWOI" => "HWOI",
                other => return Err(unsupported(node, format!("kernel layout {other}"))),
            },
            _ => "",
        };
        let mut inputs = Vec::with_capacity(node.inputs.len());
        for index in 0..node.inputs.len() {
            let layout = if index == 1 { kernel_layout } else { "" };
            inputs.push(self.operand(node, index, layout)?);
        }
        let input_dims = inputs
            .iter()
            .map(|value| self.dims(*value).to_vec())
            .collect::<Vec<_>>();
        let (op, dims) = lower_op(node, &input_dims)?;
        Ok(Step {
            name: node.name.clone(),
            op,
            inputs,
            dims,
        })
    }
}

fn relayout(dims: &[usize], values: &[f32], perm: &[usize]) -> (Vec<usize>, Vec<f32>) {
    let out_dims = perm.iter().map(|axis| dims[*axis]).collect::<Vec<_>>();
    (out_dims.clone(), transpose(values, dims, perm, &out_dims))
}

fn unsupported(node: &Node, detail: impl std::fmt::Display) -> BuildError {
    BuildError::Unsupported(format!("{} '{}': {detail}", node.op, node.name))
}

fn first(node: &Node, dims: &[Vec<usize>]) -> Result<Vec<usize>, BuildError> {
    dims.first()
        .cloned()
        .ok_or_else(|| unsupported(node, "missing data operand"))
}

fn axis(node: &Node, axis: i64, rank: usize) -> Result<usize, BuildError> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if (0..rank as i64).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        Err(unsupported(node, format!("axis {axis} out of range for rank {rank}")))
    }
}

fn to_usize_array<const N: usize>(node: &Node, values: [i64; N]) -> Result<[usize; N], BuildError> {
    let mut out = [0usize; N];
    for (slot, value) in out.iter_mut().zip(values) {
        *slot = usize::try_from(value)
            .map_err(|_| unsupported(node, format!("negative window value {value}")))?;
    }
    Ok(out)
}

fn pair_attr(node: &Node, name: &str, default: i64) -> Result<[usize; 2], BuildError> {
    let values = node.attr_i64_array(name).unwrap_or(&[]);
    let pair = if values.is_empty() {
        [default; 2]
    } else {
        expand_pair(values).ok_or_else(|| unsupported(node, format!("bad {name} attribute")))?
    };
    to_usize_array(node, pair)
}

fn padding_attr(node: &Node) -> Result<[usize; 4], BuildError> {
    let values = node.attr_i64_array("padding").unwrap_or(&[0]);
    let padding =
        expand_padding_2d(values).ok_or_else(|| unsupported(node, "bad padding attribute"))?;
    to_usize_array(node, padding)
}

fn windowed_extent(
    node: &Node,
    input: &[usize],
    window: [usize; 2],
    strides: [usize; 2],
    padding: [usize; 4],
    dilation: [usize; 2],
) -> Result<[usize; 2], BuildError> {
    let height = window_output_extent(input[2], padding[0], padding[2], window[0], strides[0], dilation[0]);
    let width = window_output_extent(input[3], padding[1], padding[3], window[1], strides[1], dilation[1]);
    match (height, width) {
        (Some(height), Some(width)) => Ok([height, width]),
        _ => Err(unsupported(node, format!("window does not fit input {input:?}"))),
    }
}

fn require_rank(node: &Node, dims: &[usize], rank: usize) -> Result<(), BuildError> {
    if dims.len() != rank {
        return Err(unsupported(node, format!("expected rank {rank}, got {dims:?}")));
    }
    Ok(())
}

fn lower_op(node: &Node, inputs: &[Vec<usize>]) -> Result<(PlanOp, Vec<usize>), BuildError> {
    let data = first(node, inputs)?;
    match &node.op {
        OpKind::Conv2d => {
            let weight = inputs.get(1).ok_or_else(|| unsupported(node, "missing weight"))?;
            require_rank(node, &data, 4)?;
            require_rank(node, weight, 4)?;
            let strides = pair_attr(node, "strides", 1)?;
            let dilation = pair_attr(node, "dilation", 1)?;
            let padding = padding_attr(node)?;
            let groups = usize::try_from(node.attr_i64("groups").unwrap_or(1))
                .ok()
                .filter(|groups| *groups > 0)
                .ok_or_else(|| unsupported(node, "groups must be positive"))?;
            if data[1] % groups != 0 || weight[1] * groups != data[1] || weight[0] % groups != 0 {
                return Err(unsupported(
                    node,
                    format!("weight {weight:?} incompatible with input {data:?} and {groups} groups"),
                ));
            }
            let [height, width] =
                windowed_extent(node, &data, [weight[2], weight[3]], strides, padding, dilation)?;
            Ok((
                PlanOp::Conv2d {
                    strides,
                    padding,
                    dilation,
                    groups,
                },
                vec![data[0], weight[0], height, width],
            ))
        }
        OpKind::Dense => {
            let weight = inputs.get(1).ok_or_else(|| unsupported(node, "missing weight"))?;
            require_rank(node, &data, 2)?;
            require_rank(node, weight, 2)?;
            if data[1] != weight[1] {
                return Err(unsupported(node, format!("weight {weight:?} does not match input {data:?}")));
            }
            Ok((PlanOp::Dense, vec![data[0], weight[0]]))
        }
        OpKind::BiasAdd => {
            let bias = inputs.get(1).ok_or_else(|| unsupported(node, "missing bias"))?;
            if data.len() < 2 || bias.as_slice() != [data[1]] {
                return Err(unsupported(node, format!("bias {bias:?} does not match input {data:?}")));
            }
            Ok((PlanOp::BiasAdd, data))
        }
        OpKind::Add | OpKind::Multiply => {
            let rhs = inputs.get(1).ok_or_else(|| unsupported(node, "missing operand"))?;
            let offset = data
                .len()
                .checked_sub(rhs.len())
                .ok_or_else(|| unsupported(node, "rhs rank exceeds lhs rank"))?;
            if rhs
                .iter()
                .zip(&data[offset..])
                .any(|(r, l)| *r != 1 && r != l)
            {
                return Err(unsupported(node, format!("{rhs:?} does not broadcast into {data:?}")));
            }
            let op = if node.op == OpKind::Add {
                PlanOp::Add
            } else {
                PlanOp::Multiply
            };
            Ok((op, data))
        }
        OpKind::Relu => Ok((PlanOp::Relu, data)),
        OpKind::Sigmoid => Ok((PlanOp::Sigmoid, data)),
        OpKind::Tanh => Ok((PlanOp::Tanh, data)),
        OpKind::Dropout => Ok((PlanOp::Identity, data)),
        OpKind::Clip => {
            let min = node.attr_f64("a_min").unwrap_or(f64::NEG_INFINITY) as f32;
            let max = node.attr_f64("a_max").unwrap_or(f64::INFINITY) as f32;
            Ok((PlanOp::Clip { min, max }, data))
        }
        OpKind::BatchNorm => {
            let epsilon = node.attr_f64("epsilon").unwrap_or(1e-5) as f32;
            if data.len() < 2 || inputs[1..].iter().any(|stat| stat.as_slice() != [data[1]]) {
                return Err(unsupported(node, "statistics do not match the channel extent"));
            }
            Ok((PlanOp::BatchNorm { epsilon }, data))
        }
        OpKind::MaxPool2d | OpKind::AvgPool2d => {
            require_rank(node, &data, 4)?;
            let window = pair_attr(node, "pool_size", 1)?;
            let strides = pair_attr(node, "strides", 1)?;
            let padding = padding_attr(node)?;
            let [height, width] = windowed_extent(node, &data, window, strides, padding, [1, 1])?;
            let op = if node.op == OpKind::MaxPool2d {
                PlanOp::MaxPool2d {
                    window,
                    strides,
                    padding,
                }
            } else {
                PlanOp::AvgPool2d {
                    window,
                    strides,
                    padding,
                    count_include_pad: node.attr_bool("count_include_pad").unwrap_or(false),
                }
            };
            Ok((op, vec![data[0], data[1], height, width]))
        }
        OpKind::GlobalAvgPool2d => {
            require_rank(node, &data, 4)?;
            Ok((PlanOp::GlobalAvgPool2d, vec![data[0], data[1], 1, 1]))
        }
        OpKind::Softmax => {
            let axis = axis(node, node.attr_i64("axis").unwrap_or(-1), data.len())?;
            Ok((PlanOp::Softmax { axis }, data))
        }
        OpKind::Reshape => {
            let newshape = node
                .attr_i64_array("newshape")
                .ok_or_else(|| unsupported(node, "missing newshape"))?;
            Ok((PlanOp::Identity, reshape_dims(node, &data, newshape)?))
        }
        OpKind::BatchFlatten => {
            if data.is_empty() {
                return Err(unsupported(node, "scalar input"));
            }
            Ok((PlanOp::Identity, vec![data[0], data[1..].iter().product()]))
        }
        OpKind::Squeeze => {
            let axes = node
                .attr_i64_array("axis")
                .ok_or_else(|| unsupported(node, "missing axis"))?
                .iter()
                .map(|a| axis(node, *a, data.len()))
                .collect::<Result<Vec<_>, _>>()?;
            let dims = data
                .iter()
                .enumerate()
                .filter(|(index, _)| !axes.contains(index))
                .map(|(_, dim)| *dim)
                .collect();
            Ok((PlanOp::Identity, dims))
        }
        OpKind::Concatenate => {
            let axis = axis(node, node.attr_i64("axis").unwrap_or(0), data.len())?;
            let mut dims = data.clone();
            dims[axis] = 0;
            for operand in inputs {
                if operand.len() != data.len()
                    || operand
                        .iter()
                        .zip(&data)
                        .enumerate()
                        .any(|(index, (a, b))| index != axis && a != b)
                {
                    return Err(unsupported(node, format!("operand {operand:?} does not match {data:?}")));
                }
                dims[axis] += operand[axis];
            }
            Ok((PlanOp::Concatenate { axis }, dims))
        }
        OpKind::Pad => {
            let flat = node
                .attr_i64_array("pad_width")
                .ok_or_else(|| unsupported(node, "missing pad_width"))?;
            if flat.len() != data.len() * 2 {
                return Err(unsupported(node, "pad_width does not match the input rank"));
            }
            let mut width = Vec::with_capacity(data.len());
            let mut dims = Vec::with_capacity(data.len());
            for (dim, pair) in data.iter().zip(flat.chunks_exact(2)) {
                let [before, after] = to_usize_array(node, [pair[0], pair[1]])?;
                width.push([before, after]);
                dims.push(dim + before + after);
            }
            let value = node.attr_f64("pad_value").unwrap_or(0.0) as f32;
            Ok((PlanOp::Pad { width, value }, dims))
        }
        OpKind::Transpose => {
            let perm = node
                .attr_i64_array("axes")
                .ok_or_else(|| unsupported(node, "missing axes"))?
                .iter()
                .map(|a| axis(node, *a, data.len()))
                .collect::<Result<Vec<_>, _>>()?;
            if perm.len() != data.len() {
                return Err(unsupported(node, "axes do not name every dimension"));
            }
            let dims = perm.iter().map(|a| data[*a]).collect();
            Ok((PlanOp::Transpose { perm }, dims))
        }
        OpKind::TopK | OpKind::NonMaxSuppression | OpKind::Custom(_) => {
            Err(unsupported(node, "no reference kernel"))
        }
    }
}

/// Resolves `newshape` against concrete input dims: `0` copies the input
/// extent at the same position and a single `-1` is inferred.
fn reshape_dims(node: &Node, input: &[usize], newshape: &[i64]) -> Result<Vec<usize>, BuildError> {
    let total = input.iter().product::<usize>();
    let mut dims = Vec::with_capacity(newshape.len());
    let mut inferred = None;
    for (index, value) in newshape.iter().enumerate() {
        match *value {
            0 => dims.push(
                *input
                    .get(index)
                    .ok_or_else(|| unsupported(node, "newshape 0 past the input rank"))?,
            ),
            -1 if inferred.is_none() => {
                inferred = Some(index);
                dims.push(1);
            }
            v if v > 0 => dims.push(v as usize),
            other => return Err(unsupported(node, format!("newshape value {other}"))),
        }
    }
    let known = dims.iter().product::<usize>();
    if let Some(index) = inferred {
        if known == 0 || total % known != 0 {
            return Err(unsupported(node, format!("cannot infer a dimension of {newshape:?} from {input:?}")));
        }
        dims[index] = total / known;
    } else if known != total {
        return Err(unsupported(node, format!("newshape {newshape:?} does not fit {input:?}")));
    }
    Ok(dims)
}

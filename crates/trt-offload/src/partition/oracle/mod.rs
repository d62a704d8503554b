//! Per-node eligibility rules for the accelerator.
//!
//! Rules are node-local: a verdict depends only on the node, the declared
//! types of its operands and the oracle configuration. Rejection reasons are
//! surfaced verbatim to callers, so every message names the violated
//! constraint and is stable across runs.

mod conv;
mod dense;
mod elementwise;
mod norm;
mod pool;
mod shape;

use serde::{Deserialize, Serialize};

use crate::ir::{DType, Graph, Input, Node, OpKind, TensorSpec};

/// Bumped whenever a rule change can flip a verdict.
pub const ORACLE_VERSION: i64 = 1;

pub(crate) type RuleResult = Result<(), String>;

/// Outcome of checking one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityVerdict {
    pub supported: bool,
    pub reason: Option<String>,
}

impl EligibilityVerdict {
    pub fn supported() -> Self {
        Self {
            supported: true,
            reason: None,
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            supported: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }
}

impl From<RuleResult> for EligibilityVerdict {
    fn from(result: RuleResult) -> Self {
        match result {
            Ok(()) => EligibilityVerdict::supported(),
            Err(reason) => EligibilityVerdict::unsupported(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub allowed_dtypes: Vec<DType>,
    /// Accept a dynamic leading (batch) axis on shape-independent operators.
    pub allow_dynamic_batch: bool,
    pub max_rank: usize,
    pub max_conv_stride: i64,
    pub max_pool_size: i64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            allowed_dtypes: vec![DType::F32, DType::F16],
            allow_dynamic_batch: false,
            max_rank: 4,
            max_conv_stride: 16,
            max_pool_size: 64,
        }
    }
}

/// Pure per-node classifier. Holds only configuration; safe to share
/// across threads.
#[derive(Debug, Clone, Default)]
pub struct Oracle {
    config: OracleConfig,
}

impl Oracle {
    pub fn new(config: OracleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn check(&self, graph: &Graph, node: &Node) -> EligibilityVerdict {
        let cx = NodeCtx {
            graph,
            node,
            config: &self.config,
        };
        check_node(&cx).into()
    }
}

fn check_node(cx: &NodeCtx<'_>) -> RuleResult {
    match &cx.node.op {
        OpKind::Custom(_) => return Err("unregistered operator".to_string()),
        OpKind::TopK | OpKind::NonMaxSuppression => {
            return Err("operator has no accelerator lowering".to_string())
        }
        _ => {}
    }

    let operands = cx.operand_specs()?;
    check_dtypes(cx, &operands)?;
    check_ranks(cx, &operands)?;
    check_dynamic_dims(cx, &operands)?;

    match &cx.node.op {
        OpKind::Conv2d => conv::check(cx),
        OpKind::MaxPool2d | OpKind::AvgPool2d | OpKind::GlobalAvgPool2d => pool::check(cx),
        OpKind::Dense | OpKind::BiasAdd => dense::check(cx),
        OpKind::Add
        | OpKind::Multiply
        | OpKind::Relu
        | OpKind::Clip
        | OpKind::Sigmoid
        | OpKind::Tanh
        | OpKind::Dropout
        | OpKind::Softmax => elementwise::check(cx),
        OpKind::BatchNorm => norm::check(cx),
        OpKind::Reshape
        | OpKind::BatchFlatten
        | OpKind::Squeeze
        | OpKind::Concatenate
        | OpKind::Pad
        | OpKind::Transpose => shape::check(cx),
        OpKind::Custom(_) | OpKind::TopK | OpKind::NonMaxSuppression => {
            Err("operator has no accelerator lowering".to_string())
        }
    }
}

fn check_dtypes(cx: &NodeCtx<'_>, operands: &[&TensorSpec]) -> RuleResult {
    for spec in operands.iter().copied().chain(std::iter::once(&cx.node.output)) {
        if !cx.config.allowed_dtypes.contains(&spec.dtype) {
            return Err(format!("unsupported dtype: {}", spec.dtype));
        }
    }
    let mut data = cx
        .node
        .inputs
        .iter()
        .zip(operands)
        .filter(|(input, _)| !matches!(input, Input::Param(_)))
        .map(|(_, spec)| spec.dtype);
    if let Some(first) = data.next() {
        if let Some(other) = data.find(|dtype| *dtype != first) {
            return Err(format!("mixed input dtypes: {first} and {other}"));
        }
    }
    Ok(())
}

fn check_ranks(cx: &NodeCtx<'_>, operands: &[&TensorSpec]) -> RuleResult {
    for spec in operands.iter().copied().chain(std::iter::once(&cx.node.output)) {
        if spec.rank() > cx.config.max_rank {
            return Err(format!(
                "rank {} exceeds the supported maximum of {}",
                spec.rank(),
                cx.config.max_rank
            ));
        }
    }
    Ok(())
}

/// Dynamic extents are only tolerated on the leading axis, and only for
/// operators whose lowering does not need the concrete batch size.
fn check_dynamic_dims(cx: &NodeCtx<'_>, operands: &[&TensorSpec]) -> RuleResult {
    let mut dynamic_batch = false;
    for spec in operands.iter().copied().chain(std::iter::once(&cx.node.output)) {
        for (axis, dim) in spec.shape.dims().iter().enumerate() {
            if !dim.is_dynamic() {
                continue;
            }
            if axis > 0 {
                return Err(format!("dynamic dimension at axis {axis} unsupported"));
            }
            dynamic_batch = true;
        }
    }
    if !dynamic_batch {
        return Ok(());
    }
    if is_shape_dependent(&cx.node.op) {
        return Err(format!(
            "dynamic batch dimension unsupported for {}",
            cx.node.op
        ));
    }
    if !cx.config.allow_dynamic_batch {
        return Err("dynamic batch dimension unsupported".to_string());
    }
    Ok(())
}

fn is_shape_dependent(op: &OpKind) -> bool {
    matches!(
        op,
        OpKind::Reshape | OpKind::BatchFlatten | OpKind::Squeeze | OpKind::Transpose
    )
}

pub(crate) struct NodeCtx<'a> {
    pub(crate) graph: &'a Graph,
    pub(crate) node: &'a Node,
    pub(crate) config: &'a OracleConfig,
}

impl<'a> NodeCtx<'a> {
    fn operand_specs(&self) -> Result<Vec<&'a TensorSpec>, String> {
        self.node
            .inputs
            .iter()
            .enumerate()
            .map(|(idx, input)| {
                self.graph
                    .input_spec(input)
                    .ok_or_else(|| format!("operand {idx} ({input}) is not defined in the graph"))
            })
            .collect()
    }

    pub(crate) fn expect_arity(&self, expected: usize) -> RuleResult {
        let found = self.node.inputs.len();
        if found != expected {
            return Err(format!(
                "{} expects {expected} operands, found {found}",
                self.node.op
            ));
        }
        Ok(())
    }

    pub(crate) fn operand(&self, index: usize) -> Result<&'a TensorSpec, String> {
        let input = self
            .node
            .inputs
            .get(index)
            .ok_or_else(|| format!("{} is missing operand {index}", self.node.op))?;
        self.graph
            .input_spec(input)
            .ok_or_else(|| format!("operand {index} ({input}) is not defined in the graph"))
    }

    /// Requires the operand to be an external constant parameter.
    pub(crate) fn constant_operand(&self, index: usize, what: &str) -> Result<&'a TensorSpec, String> {
        match self.node.inputs.get(index) {
            Some(Input::Param(_)) => self.operand(index),
            _ => Err(format!("{what} must be a constant parameter")),
        }
    }

    pub(crate) fn output(&self) -> &'a TensorSpec {
        &self.node.output
    }

    pub(crate) fn i64_array_or(&self, name: &str, default: &[i64]) -> Result<Vec<i64>, String> {
        match self.node.attr(name) {
            None => Ok(default.to_vec()),
            Some(value) => value
                .as_i64_array()
                .map(<[i64]>::to_vec)
                .ok_or_else(|| format!("attribute '{name}' must be an integer array")),
        }
    }

    pub(crate) fn i64_or(&self, name: &str, default: i64) -> Result<i64, String> {
        match self.node.attr(name) {
            None => Ok(default),
            Some(value) => value
                .as_i64()
                .ok_or_else(|| format!("attribute '{name}' must be an integer")),
        }
    }

    pub(crate) fn f64_or(&self, name: &str, default: f64) -> Result<f64, String> {
        match self.node.attr(name) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .ok_or_else(|| format!("attribute '{name}' must be a number")),
        }
    }

    pub(crate) fn str_or<'s>(&'s self, name: &str, default: &'s str) -> Result<&'s str, String> {
        match self.node.attr(name) {
            None => Ok(default),
            Some(value) => value
                .as_str()
                .ok_or_else(|| format!("attribute '{name}' must be a string")),
        }
    }

    pub(crate) fn bool_or(&self, name: &str, default: bool) -> Result<bool, String> {
        match self.node.attr(name) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| format!("attribute '{name}' must be a boolean")),
        }
    }
}

/// Resolves a possibly negative axis against `rank`.
pub(crate) fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let resolved = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&resolved).then_some(resolved as usize)
}

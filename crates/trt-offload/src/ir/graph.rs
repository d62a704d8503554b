use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::{AttrValue, Attrs, TensorSpec};

/// Operator kinds understood by the host compiler.
///
/// `Custom` carries operators registered by the front end that have no
/// builtin meaning here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Conv2d,
    Dense,
    BiasAdd,
    Add,
    Multiply,
    Relu,
    Clip,
    Sigmoid,
    Tanh,
    BatchNorm,
    MaxPool2d,
    AvgPool2d,
    GlobalAvgPool2d,
    Softmax,
    Reshape,
    BatchFlatten,
    Squeeze,
    Concatenate,
    Pad,
    Dropout,
    Transpose,
    TopK,
    NonMaxSuppression,
    Custom(String),
}

impl OpKind {
    pub fn as_str(&self) -> &str {
        match self {
            OpKind::Conv2d => "Conv2d",
            OpKind::Dense => "Dense",
            OpKind::BiasAdd => "BiasAdd",
            OpKind::Add => "Add",
            OpKind::Multiply => "Multiply",
            OpKind::Relu => "Relu",
            OpKind::Clip => "Clip",
            OpKind::Sigmoid => "Sigmoid",
            OpKind::Tanh => "Tanh",
            OpKind::BatchNorm => "BatchNorm",
            OpKind::MaxPool2d => "MaxPool2d",
            OpKind::AvgPool2d => "AvgPool2d",
            OpKind::GlobalAvgPool2d => "GlobalAvgPool2d",
            OpKind::Softmax => "Softmax",
            OpKind::Reshape => "Reshape",
            OpKind::BatchFlatten => "BatchFlatten",
            OpKind::Squeeze => "Squeeze",
            OpKind::Concatenate => "Concatenate",
            OpKind::Pad => "Pad",
            OpKind::Dropout => "Dropout",
            OpKind::Transpose => "Transpose",
            OpKind::TopK => "TopK",
            OpKind::NonMaxSuppression => "NonMaxSuppression",
            OpKind::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a node inside its graph. Ids are dense and ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operand reference of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Input {
    /// Output of an earlier node.
    Node(NodeId),
    /// Runtime input of the entry function, by position.
    GraphInput(usize),
    /// External constant parameter (weights), by name.
    Param(String),
}

impl From<NodeId> for Input {
    fn from(id: NodeId) -> Self {
        Input::Node(id)
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Node(id) => write!(f, "%{}", id.0),
            Input::GraphInput(index) => write!(f, "%in{index}"),
            Input::Param(name) => write!(f, "@{name}"),
        }
    }
}

/// One operator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub op: OpKind,
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub attrs: Attrs,
    pub output: TensorSpec,
}

impl Node {
    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn attr_i64(&self, name: &str) -> Option<i64> {
        self.attr(name).and_then(AttrValue::as_i64)
    }

    pub fn attr_i64_array(&self, name: &str) -> Option<&[i64]> {
        self.attr(name).and_then(AttrValue::as_i64_array)
    }

    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        self.attr(name).and_then(AttrValue::as_f64)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attr(name).and_then(AttrValue::as_str)
    }

    pub fn attr_bool(&self, name: &str) -> Option<bool> {
        self.attr(name).and_then(AttrValue::as_bool)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphInput {
    pub name: String,
    pub spec: TensorSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub spec: TensorSpec,
}

/// Top-level function of a graph. Attributes are the host compiler's
/// function-attribute mechanism; compiler tags live here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryFunction {
    pub name: String,
    #[serde(default)]
    pub attrs: Attrs,
}

impl EntryFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Attrs::new(),
        }
    }
}

/// Ordered acyclic operator graph with a designated entry function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub entry: EntryFunction,
    pub inputs: Vec<GraphInput>,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    pub nodes: Vec<Node>,
    pub outputs: Vec<NodeId>,
}

impl Graph {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).filter(|node| node.id == id)
    }

    pub fn param(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|param| param.name == name)
    }

    /// Resolves the declared type of an operand.
    pub fn input_spec(&self, input: &Input) -> Option<&TensorSpec> {
        match input {
            Input::Node(id) => self.node(*id).map(|node| &node.output),
            Input::GraphInput(index) => self.inputs.get(*index).map(|input| &input.spec),
            Input::Param(name) => self.param(name).map(|param| &param.spec),
        }
    }

    pub fn output_specs(&self) -> Vec<&TensorSpec> {
        self.outputs
            .iter()
            .filter_map(|id| self.node(*id))
            .map(|node| &node.output)
            .collect()
    }

    /// Names of every parameter referenced by at least one node.
    pub fn referenced_params(&self) -> Vec<&str> {
        let mut names = self
            .nodes
            .iter()
            .flat_map(|node| node.inputs.iter())
            .filter_map(|input| match input {
                Input::Param(name) => Some(name.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn to_text(&self) -> String {
        format!("{self}")
    }
}

/// Incremental graph construction that keeps node ids dense and inputs
/// pointing backwards.
#[derive(Debug)]
pub struct GraphBuilder {
    entry: EntryFunction,
    inputs: Vec<GraphInput>,
    params: Vec<ParamDecl>,
    nodes: Vec<Node>,
}

impl GraphBuilder {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: EntryFunction::new(entry),
            inputs: Vec::new(),
            params: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn add_input(&mut self, name: impl Into<String>, spec: TensorSpec) -> Input {
        let index = self.inputs.len();
        self.inputs.push(GraphInput {
            name: name.into(),
            spec,
        });
        Input::GraphInput(index)
    }

    pub fn add_param(&mut self, name: impl Into<String>, spec: TensorSpec) -> Input {
        let name = name.into();
        self.params.push(ParamDecl {
            name: name.clone(),
            spec,
        });
        Input::Param(name)
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        op: OpKind,
        inputs: Vec<Input>,
        attrs: Attrs,
        output: TensorSpec,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            name: name.into(),
            op,
            inputs,
            attrs,
            output,
        });
        id
    }

    pub fn finish(self, outputs: Vec<NodeId>) -> Graph {
        Graph {
            entry: self.entry,
            inputs: self.inputs,
            params: self.params,
            nodes: self.nodes,
            outputs,
        }
    }
}

/// Builds an attribute table from `(name, value)` pairs.
pub fn attrs<I, K>(pairs: I) -> Attrs
where
    I: IntoIterator<Item = (K, AttrValue)>,
    K: Into<String>,
{
    pairs
        .into_iter()
        .map(|(name, value)| (name.into(), value))
        .collect()
}

//! Graph boundary types consumed by the partitioner and the runtime.
//!
//! The host compiler owns graphs; this module only describes the shape of the
//! data crossing the boundary (nodes, typed attributes, the entry function
//! and its attribute table).

mod graph;
mod text;
mod topology;
mod types;
pub mod window;

pub use graph::{
    attrs, EntryFunction, Graph, GraphBuilder, GraphInput, Input, Node, NodeId, OpKind, ParamDecl,
};
pub use topology::{validate_graph_topology, TopologyError};
pub use types::{AttrValue, Attrs, DType, DimSymbol, Dimension, Shape, TensorSpec};

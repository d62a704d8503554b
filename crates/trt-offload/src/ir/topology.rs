use std::collections::HashSet;

use thiserror::Error;

use super::graph::{Graph, Input};

/// Violation of the graph ordering invariant: inputs may only reference
/// earlier nodes, declared graph inputs or declared parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("node at position {position} has id {found}; ids must be dense and ascending")]
    NonSequentialId { position: usize, found: u32 },
    #[error("node {node} ('{name}') references node {missing} before it is defined")]
    ForwardReference { node: u32, name: String, missing: u32 },
    #[error("node {node} ('{name}') references graph input {index}, but only {available} are declared")]
    UnknownGraphInput {
        node: u32,
        name: String,
        index: usize,
        available: usize,
    },
    #[error("node {node} ('{name}') references undeclared parameter '{param}'")]
    UnknownParam {
        node: u32,
        name: String,
        param: String,
    },
    #[error("graph output references unknown node {0}")]
    UnknownOutput(u32),
    #[error("graph declares no outputs")]
    NoOutputs,
    #[error("parameter '{0}' is declared more than once")]
    DuplicateParam(String),
}

pub fn validate_graph_topology(graph: &Graph) -> Result<(), TopologyError> {
    let mut params = HashSet::new();
    for param in &graph.params {
        if !params.insert(param.name.as_str()) {
            return Err(TopologyError::DuplicateParam(param.name.clone()));
        }
    }

    for (position, node) in graph.nodes.iter().enumerate() {
        if node.id.index() != position {
            return Err(TopologyError::NonSequentialId {
                position,
                found: node.id.0,
            });
        }
        for input in &node.inputs {
            match input {
                Input::Node(id) if id.0 >= node.id.0 => {
                    return Err(TopologyError::ForwardReference {
                        node: node.id.0,
                        name: node.name.clone(),
                        missing: id.0,
                    });
                }
                Input::GraphInput(index) if *index >= graph.inputs.len() => {
                    return Err(TopologyError::UnknownGraphInput {
                        node: node.id.0,
                        name: node.name.clone(),
                        index: *index,
                        available: graph.inputs.len(),
                    });
                }
                Input::Param(param) if !params.contains(param.as_str()) => {
                    return Err(TopologyError::UnknownParam {
                        node: node.id.0,
                        name: node.name.clone(),
                        param: param.clone(),
                    });
                }
                Input::Node(_) | Input::GraphInput(_) | Input::Param(_) => {}
            }
        }
    }

    if graph.outputs.is_empty() {
        return Err(TopologyError::NoOutputs);
    }
    for output in &graph.outputs {
        if graph.node(*output).is_none() {
            return Err(TopologyError::UnknownOutput(output.0));
        }
    }
    Ok(())
}

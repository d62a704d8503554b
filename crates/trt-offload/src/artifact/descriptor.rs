//! JSON graph descriptor. The graph carries its compiler tag in the entry
//! function attributes.

use serde::{Deserialize, Serialize};

use crate::ir::{validate_graph_topology, Graph};
use crate::partition::CompilerTag;

use super::ArtifactError;

const DESCRIPTOR_VERSION: u32 = 1;
const BLOB: &str = "graph descriptor";

#[derive(Debug, Serialize, Deserialize)]
struct GraphDescriptor {
    descriptor_version: u32,
    graph: Graph,
}

pub fn encode_descriptor(graph: &Graph) -> Result<Vec<u8>, ArtifactError> {
    let descriptor = GraphDescriptorRef {
        descriptor_version: DESCRIPTOR_VERSION,
        graph,
    };
    Ok(serde_json::to_vec_pretty(&descriptor)?)
}

/// Decodes and validates a descriptor: known version, well-formed topology
/// and an accelerator tag on the entry function.
pub fn decode_descriptor(bytes: &[u8]) -> Result<Graph, ArtifactError> {
    let descriptor: GraphDescriptor = serde_json::from_slice(bytes)?;
    if descriptor.descriptor_version != DESCRIPTOR_VERSION {
        return Err(ArtifactError::UnsupportedVersion {
            blob: BLOB,
            version: descriptor.descriptor_version,
        });
    }
    validate_graph_topology(&descriptor.graph)?;
    match CompilerTag::from_entry(&descriptor.graph.entry) {
        Some(tag) if tag.routes_to_accelerator() => Ok(descriptor.graph),
        _ => Err(ArtifactError::MissingCompilerTag),
    }
}

#[derive(Serialize)]
struct GraphDescriptorRef<'a> {
    descriptor_version: u32,
    graph: &'a Graph,
}

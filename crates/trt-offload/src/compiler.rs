//! Compile driver: partition, then lower to an artifact.

use log::{info, warn};
use thiserror::Error;

use crate::accelerator::Accelerator;
use crate::artifact::{CompiledArtifact, ParamBindingError, ParamBlob};
use crate::ir::{validate_graph_topology, Graph, TopologyError};
use crate::options::OffloadOptions;
use crate::partition::{AcceptancePass, Partition, RejectionReason};
use crate::profiling;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("graph topology: {0}")]
    Topology(#[from] TopologyError),
    #[error(transparent)]
    ParamBinding(#[from] ParamBindingError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileOutcome {
    /// Accepted and lowered; the artifact's engine store is empty.
    Offloaded(CompiledArtifact),
    /// Rejected; the graph is returned untouched for the generic path.
    Fallback {
        graph: Graph,
        diagnostics: Vec<RejectionReason>,
    },
    /// The accelerator is not usable in this environment.
    Skipped { graph: Graph, reason: String },
}

impl CompileOutcome {
    pub fn is_offloaded(&self) -> bool {
        matches!(self, CompileOutcome::Offloaded(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct OffloadCompiler {
    pass: AcceptancePass,
}

impl OffloadCompiler {
    pub fn new(options: &OffloadOptions) -> Self {
        Self {
            pass: AcceptancePass::new(options.oracle.clone()),
        }
    }

    pub fn compile<A: Accelerator>(
        &self,
        accelerator: &A,
        graph: Graph,
        params: ParamBlob,
    ) -> Result<CompileOutcome, CompileError> {
        let _scope = profiling::compile_scope("trt_offload.compile");
        validate_graph_topology(&graph)?;

        if !accelerator.is_available() {
            let reason = format!("accelerator '{}' is unavailable", accelerator.name());
            warn!("skipping offload of '{}': {reason}", graph.entry.name);
            return Ok(CompileOutcome::Skipped { graph, reason });
        }

        match self.pass.evaluate(graph) {
            Partition::Accepted(accepted) => {
                let artifact = CompiledArtifact::from_accepted(accepted, params)?;
                info!(
                    "lowered '{}' to an offload artifact with {} parameters",
                    artifact.graph().entry.name,
                    artifact.params().len()
                );
                Ok(CompileOutcome::Offloaded(artifact))
            }
            Partition::Rejected(rejected) => Ok(CompileOutcome::Fallback {
                graph: rejected.graph,
                diagnostics: rejected.reasons,
            }),
        }
    }
}

//! Whole-graph accelerator offload.
//!
//! [`partition::AcceptancePass`] decides whether every node of a graph can
//! run on the accelerator and tags the entry function when it can.
//! [`compiler::OffloadCompiler`] lowers an accepted graph to a
//! [`artifact::CompiledArtifact`], and [`runtime::LazyEngineRuntime`] builds
//! one engine per concrete input shape on first use.

pub mod accelerator;
pub mod artifact;
pub mod compiler;
mod env;
pub mod ir;
pub mod options;
pub mod partition;
pub mod profiling;
pub mod runtime;
pub mod shape_key;
pub mod tensor;

pub use accelerator::{Accelerator, Binding, BuildConfig, BuildError, BuildRequest, ExecutionError};
pub use artifact::{ArtifactError, CompiledArtifact, EngineStore, ParamBlob, SerializedArtifact};
pub use compiler::{CompileError, CompileOutcome, OffloadCompiler};
pub use options::OffloadOptions;
pub use partition::{
    AcceptancePass, AcceptedGraph, CompilerTag, EligibilityVerdict, Oracle, OracleConfig,
    Partition, RejectedGraph, RejectionReason, COMPILER_ID,
};
pub use runtime::{BuildFailure, EngineState, Executor, LazyEngineRuntime, RuntimeError};
pub use shape_key::ShapeKey;
pub use tensor::{HostTensor, TensorError};

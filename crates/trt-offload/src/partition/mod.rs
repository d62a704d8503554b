//! Eligibility analysis and whole-graph partitioning.

mod accept;
mod oracle;
mod tag;

pub use accept::{AcceptancePass, AcceptedGraph, Partition, RejectedGraph, RejectionReason};
pub use oracle::{EligibilityVerdict, Oracle, OracleConfig, ORACLE_VERSION};
pub use tag::{
    CompilerTag, ACCEPTED_ATTR, COMPILER_ATTR, COMPILER_ID, NODE_COUNT_ATTR, ORACLE_VERSION_ATTR,
};

use std::fmt;

use log::{debug, info};

use crate::ir::{AttrValue, Graph, NodeId};

use super::oracle::{Oracle, OracleConfig, ORACLE_VERSION};
use super::tag::{CompilerTag, NODE_COUNT_ATTR, ORACLE_VERSION_ATTR};

/// One unsupported node in a rejected graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectionReason {
    pub node_id: NodeId,
    pub node: String,
    pub op: String,
    pub reason: String,
}

impl RejectionReason {
    /// `(node name, operator kind, reason)` triple.
    pub fn as_tuple(&self) -> (&str, &str, &str) {
        (&self.node, &self.op, &self.reason)
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.node, self.op, self.reason)
    }
}

/// A graph whose every node is accelerator-eligible, tagged on its entry
/// function. Only the acceptance pass constructs one.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedGraph {
    graph: Graph,
    tag: CompilerTag,
}

impl AcceptedGraph {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn tag(&self) -> &CompilerTag {
        &self.tag
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

/// The untouched input graph plus every unsupported node.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedGraph {
    pub graph: Graph,
    pub reasons: Vec<RejectionReason>,
}

impl RejectedGraph {
    pub fn summary(&self) -> String {
        self.reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Whole-graph verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum Partition {
    Accepted(AcceptedGraph),
    Rejected(RejectedGraph),
}

impl Partition {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Partition::Accepted(_))
    }
}

/// All-or-nothing offload decision over a whole graph.
#[derive(Debug, Clone, Default)]
pub struct AcceptancePass {
    oracle: Oracle,
}

impl AcceptancePass {
    pub fn new(config: OracleConfig) -> Self {
        Self {
            oracle: Oracle::new(config),
        }
    }

    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    /// Visits every node once. Any unsupported node rejects the graph and the
    /// graph is handed back exactly as received.
    pub fn evaluate(&self, mut graph: Graph) -> Partition {
        let reasons = self.collect_rejections(&graph);

        if !reasons.is_empty() {
            info!(
                "graph '{}' rejected for offload: {} of {} nodes unsupported",
                graph.entry.name,
                reasons.len(),
                graph.nodes.len()
            );
            return Partition::Rejected(RejectedGraph { graph, reasons });
        }

        let tag = CompilerTag::accelerator();
        tag.attach(&mut graph.entry);
        graph.entry.attrs.insert(
            NODE_COUNT_ATTR.to_string(),
            AttrValue::I64(graph.nodes.len() as i64),
        );
        graph.entry.attrs.insert(
            ORACLE_VERSION_ATTR.to_string(),
            AttrValue::I64(ORACLE_VERSION),
        );
        info!(
            "graph '{}' accepted for offload to '{}' ({} nodes)",
            graph.entry.name,
            tag.compiler_id,
            graph.nodes.len()
        );
        Partition::Accepted(AcceptedGraph { graph, tag })
    }

    fn collect_rejections(&self, graph: &Graph) -> Vec<RejectionReason> {
        let mut reasons = Vec::new();
        for node in &graph.nodes {
            let verdict = self.oracle.check(graph, node);
            if verdict.is_supported() {
                continue;
            }
            let reason = verdict
                .reason
                .unwrap_or_else(|| "unsupported operator".to_string());
            debug!("node '{}' ({}) unsupported: {}", node.name, node.op, reason);
            reasons.push(RejectionReason {
                node_id: node.id,
                node: node.name.clone(),
                op: node.op.to_string(),
                reason,
            });
        }
        reasons
    }
}

//! Core error types for rpgen-core.
//!
//! Every variant is structural: it describes a defect in the graph or in
//! how it is being mutated, never a defect in generated content.

use thiserror::Error;

use crate::edge::EdgeKind;
use crate::id::NodeId;
use crate::status::NodeStatus;
use crate::validate::Violation;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("duplicate node: '{id}'")]
    DuplicateNode { id: NodeId },

    #[error("node not found: '{id}'")]
    NodeNotFound { id: NodeId },

    /// An edge endpoint does not exist. `missing` is the absent endpoint.
    #[error("dangling edge '{from}' -[{kind}]-> '{to}': node '{missing}' does not exist")]
    DanglingEdge {
        from: NodeId,
        to: NodeId,
        kind: EdgeKind,
        missing: NodeId,
    },

    #[error("invalid {kind} edge '{from}' -> '{to}': {reason}")]
    InvalidEdgeKind {
        from: NodeId,
        to: NodeId,
        kind: EdgeKind,
        reason: String,
    },

    #[error("edge not found: '{from}' -[{kind}]-> '{to}'")]
    EdgeNotFound {
        from: NodeId,
        to: NodeId,
        kind: EdgeKind,
    },

    /// Adding this ordering edge would close a cycle.
    #[error("edge '{from}' -[{kind}]-> '{to}' would introduce a dependency cycle")]
    CycleIntroduced {
        from: NodeId,
        to: NodeId,
        kind: EdgeKind,
    },

    /// `child` already belongs to `existing`; ownership is exclusive.
    #[error("'{child}' is already contained by '{existing}', cannot also be contained by '{parent}'")]
    ParentConflict {
        child: NodeId,
        parent: NodeId,
        existing: NodeId,
    },

    #[error("dependency cycle among {count} node(s)", count = nodes.len())]
    CycleDetected { nodes: Vec<NodeId> },

    /// `to` was already processed when a prerequisite `from` was added.
    #[error("retroactive dependency: '{to}' was processed before its prerequisite '{from}'")]
    RetroactiveDependency { from: NodeId, to: NodeId },

    #[error("graph is not buildable: {count} violation(s)", count = violations.len())]
    GraphNotBuildable { violations: Vec<Violation> },

    #[error("invalid status transition for '{id}': {current} -> {next}")]
    InvalidTransition {
        id: NodeId,
        current: NodeStatus,
        next: NodeStatus,
    },

    #[error("unsupported snapshot version {found} (latest is {supported})")]
    UnsupportedSnapshotVersion { found: u32, supported: u32 },

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

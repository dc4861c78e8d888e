//! Structural validation of planning graphs.
//!
//! [`Validator::validate`] never fails: it returns every violation it
//! finds and lets the caller decide whether to abort. A graph with zero
//! violations is buildable.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::edge::{Edge, EdgeKind};
use crate::error::CoreError;
use crate::graph::GraphStore;
use crate::id::NodeId;
use crate::node::NodeKind;
use crate::schedule::kahn;
use crate::snapshot::GraphSnapshot;

/// A structural defect found by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    /// Nodes left over when Kahn's algorithm stalls over `depends_on` and
    /// `order` edges: the cycle members and anything downstream of them.
    Cycle { nodes: Vec<NodeId> },
    DuplicateNode { id: NodeId },
    DanglingEdge {
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        missing: NodeId,
    },
    DuplicateContainsParent { child: NodeId, parents: Vec<NodeId> },
    IllegalEdgeKind {
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        reason: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Cycle { nodes } => {
                let ids: Vec<&str> = nodes.iter().map(NodeId::as_str).collect();
                write!(f, "dependency cycle through [{}]", ids.join(", "))
            }
            Violation::DuplicateNode { id } => write!(f, "duplicate node '{id}'"),
            Violation::DanglingEdge {
                source,
                target,
                kind,
                missing,
            } => write!(f, "edge {source} -[{kind}]-> {target} references missing node '{missing}'"),
            Violation::DuplicateContainsParent { child, parents } => {
                let ids: Vec<&str> = parents.iter().map(NodeId::as_str).collect();
                write!(f, "'{child}' has {} contains parents: [{}]", parents.len(), ids.join(", "))
            }
            Violation::IllegalEdgeKind {
                source,
                target,
                kind,
                reason,
            } => write!(f, "illegal edge {source} -[{kind}]-> {target}: {reason}"),
        }
    }
}

/// A non-blocking interface finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub node: NodeId,
    pub message: String,
}

pub struct Validator;

impl Validator {
    pub fn validate(graph: &GraphStore) -> Vec<Violation> {
        let nodes: Vec<(&NodeId, NodeKind)> = graph.nodes().map(|n| (&n.id, n.kind)).collect();
        let edges: Vec<&Edge> = graph.edges().collect();
        check(&nodes, &edges)
    }

    /// Validates a document before restoring it, which would stop at the
    /// first defect instead of reporting all of them.
    pub fn validate_snapshot(snapshot: &GraphSnapshot) -> Vec<Violation> {
        let nodes: Vec<(&NodeId, NodeKind)> =
            snapshot.nodes.iter().map(|n| (&n.id, n.kind)).collect();
        let edges: Vec<&Edge> = snapshot.edges.iter().collect();
        check(&nodes, &edges)
    }

    pub fn is_buildable(graph: &GraphStore) -> bool {
        Self::validate(graph).is_empty()
    }

    /// Fails with `GraphNotBuildable` carrying every violation.
    pub fn ensure_buildable(graph: &GraphStore) -> Result<(), CoreError> {
        let violations = Self::validate(graph);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CoreError::GraphNotBuildable { violations })
        }
    }

    /// Interface completeness of leaf units: signature, documentation and
    /// an owning artifact. Advisories never block a build.
    pub fn lint(graph: &GraphStore) -> Vec<Advisory> {
        let mut advisories = Vec::new();
        for node in graph.nodes().filter(|n| n.kind.is_unit()) {
            let mut advise = |message: &str| {
                advisories.push(Advisory {
                    node: node.id.clone(),
                    message: message.to_string(),
                })
            };
            if node.metadata.signature.is_none() {
                advise("missing signature");
            }
            if node.metadata.doc.is_none() {
                advise("missing documentation");
            }
            if matches!(graph.parent(&node.id), Ok(None)) {
                advise("not contained by any artifact");
            }
        }
        advisories
    }
}

fn check(nodes: &[(&NodeId, NodeKind)], edges: &[&Edge]) -> Vec<Violation> {
    let mut violations = Vec::new();

    let mut known: HashMap<&NodeId, (usize, NodeKind)> = HashMap::with_capacity(nodes.len());
    for (pos, &(id, kind)) in nodes.iter().enumerate() {
        if known.contains_key(id) {
            violations.push(Violation::DuplicateNode { id: id.clone() });
        } else {
            known.insert(id, (pos, kind));
        }
    }

    let mut parents: IndexMap<&NodeId, Vec<NodeId>> = IndexMap::new();
    let mut ordering = Vec::new();
    for edge in edges {
        let source = known.get(&edge.source).copied();
        let target = known.get(&edge.target).copied();
        let (Some((from, from_kind)), Some((to, to_kind))) = (source, target) else {
            let missing = if source.is_none() {
                &edge.source
            } else {
                &edge.target
            };
            violations.push(Violation::DanglingEdge {
                source: edge.source.clone(),
                target: edge.target.clone(),
                kind: edge.kind,
                missing: missing.clone(),
            });
            continue;
        };

        let illegal = if from == to {
            Some("self-loops are not allowed".to_string())
        } else {
            edge.kind.check_endpoints(from_kind, to_kind).err()
        };
        if let Some(reason) = illegal {
            violations.push(Violation::IllegalEdgeKind {
                source: edge.source.clone(),
                target: edge.target.clone(),
                kind: edge.kind,
                reason,
            });
            continue;
        }

        match edge.kind {
            EdgeKind::Contains => {
                let list = parents.entry(&edge.target).or_default();
                if !list.contains(&edge.source) {
                    list.push(edge.source.clone());
                }
            }
            kind if kind.is_ordering() => ordering.push((from, to)),
            _ => {}
        }
    }

    for (child, list) in parents {
        if list.len() > 1 {
            violations.push(Violation::DuplicateContainsParent {
                child: child.clone(),
                parents: list,
            });
        }
    }

    let outcome = kahn(nodes.len(), &ordering, |i| nodes[i].1.priority());
    if !outcome.remaining.is_empty() {
        violations.push(Violation::Cycle {
            nodes: outcome
                .remaining
                .into_iter()
                .map(|i| nodes[i].0.clone())
                .collect(),
        });
    }

    violations
}

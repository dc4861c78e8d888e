//! Typed edges of the planning graph.
//!
//! `depends_on` and `order` edges carry the partial order the scheduler
//! must respect: for an edge u -> v, v is processed after u. `contains`
//! edges encode exclusive structural ownership. `data_flow` edges are
//! advisory and only feed localization context.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::id::NodeId;
use crate::node::NodeKind;

// ---------------------------------------------------------------------------
// Edge kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    DependsOn,
    DataFlow,
    Order,
    Contains,
}

impl EdgeKind {
    pub const ALL: [EdgeKind; 4] = [
        EdgeKind::DependsOn,
        EdgeKind::DataFlow,
        EdgeKind::Order,
        EdgeKind::Contains,
    ];

    /// Returns `true` for the kinds that constrain processing order.
    pub fn is_ordering(self) -> bool {
        matches!(self, EdgeKind::DependsOn | EdgeKind::Order)
    }

    /// Returns `true` for the kinds traversed when localizing context.
    pub fn is_contextual(self) -> bool {
        matches!(self, EdgeKind::DependsOn | EdgeKind::DataFlow)
    }

    /// Checks that an edge of this kind may connect nodes of the given kinds.
    ///
    /// Only `contains` restricts its endpoints; the other kinds may link any
    /// two distinct nodes.
    pub fn check_endpoints(self, source: NodeKind, target: NodeKind) -> Result<(), String> {
        match self {
            EdgeKind::Contains if !source.can_contain(target) => {
                Err(format!("a {source} cannot contain a {target}"))
            }
            _ => Ok(()),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EdgeKind::DependsOn => "depends_on",
            EdgeKind::DataFlow => "data_flow",
            EdgeKind::Order => "order",
            EdgeKind::Contains => "contains",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "depends_on" => Ok(EdgeKind::DependsOn),
            "data_flow" => Ok(EdgeKind::DataFlow),
            "order" => Ok(EdgeKind::Order),
            "contains" => Ok(EdgeKind::Contains),
            other => Err(format!("unknown edge kind '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// A typed edge between two planning nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(alias = "from")]
    pub source: NodeId,
    #[serde(alias = "to")]
    pub target: NodeId,
    #[serde(alias = "type")]
    pub kind: EdgeKind,
    /// Name of the value carried by a `data_flow` edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>, kind: EdgeKind) -> Self {
        Edge {
            source: source.into(),
            target: target.into(),
            kind,
            data_id: None,
            note: None,
        }
    }

    /// `dependent` depends on `prerequisite`.
    pub fn depends_on(prerequisite: impl Into<NodeId>, dependent: impl Into<NodeId>) -> Self {
        Edge::new(prerequisite, dependent, EdgeKind::DependsOn)
    }

    pub fn contains(parent: impl Into<NodeId>, child: impl Into<NodeId>) -> Self {
        Edge::new(parent, child, EdgeKind::Contains)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_data_id(mut self, data_id: impl Into<String>) -> Self {
        self.data_id = Some(data_id.into());
        self
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source.clone(),
            target: self.target.clone(),
            kind: self.kind,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.kind, self.target)
    }
}

/// Identity of an edge: at most one edge per (source, target, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
}

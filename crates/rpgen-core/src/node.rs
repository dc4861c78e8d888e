//! Planning-graph node types.
//!
//! A [`Node`] is one entity of the plan: a capability, a container, an
//! artifact, or a structural/behavioral unit inside an artifact. Its
//! [`NodeKind`] is a closed enum; the kind-dependent rules live in
//! [`NodeKind::priority`] and [`NodeKind::can_contain`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::id::NodeId;
use crate::status::NodeStatus;

/// Coarse-to-fine category of a planning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Capability,
    #[serde(alias = "folder")]
    Container,
    #[serde(alias = "file")]
    Artifact,
    #[serde(alias = "class", alias = "structural_unit")]
    StructuralUnit,
    #[serde(alias = "function", alias = "behavioral_unit")]
    BehavioralUnit,
}

impl NodeKind {
    pub const ALL: [NodeKind; 5] = [
        NodeKind::Capability,
        NodeKind::Container,
        NodeKind::Artifact,
        NodeKind::StructuralUnit,
        NodeKind::BehavioralUnit,
    ];

    /// Scheduling priority among simultaneously-ready nodes. Lower runs first.
    pub fn priority(self) -> u8 {
        match self {
            NodeKind::Capability => 0,
            NodeKind::Container => 1,
            NodeKind::Artifact => 2,
            NodeKind::StructuralUnit => 3,
            NodeKind::BehavioralUnit => 4,
        }
    }

    /// Whether a node of this kind may be the source of a `contains` edge
    /// whose target has kind `child`.
    pub fn can_contain(self, child: NodeKind) -> bool {
        match self {
            NodeKind::Capability => matches!(
                child,
                NodeKind::Capability | NodeKind::Container | NodeKind::Artifact
            ),
            NodeKind::Container => matches!(child, NodeKind::Container | NodeKind::Artifact),
            NodeKind::Artifact => {
                matches!(child, NodeKind::StructuralUnit | NodeKind::BehavioralUnit)
            }
            NodeKind::StructuralUnit => child == NodeKind::BehavioralUnit,
            NodeKind::BehavioralUnit => false,
        }
    }

    /// Structural and behavioral units are the leaves that carry code.
    pub fn is_unit(self) -> bool {
        matches!(self, NodeKind::StructuralUnit | NodeKind::BehavioralUnit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Capability => "capability",
            NodeKind::Container => "container",
            NodeKind::Artifact => "artifact",
            NodeKind::StructuralUnit => "structural-unit",
            NodeKind::BehavioralUnit => "behavioral-unit",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capability" => Ok(NodeKind::Capability),
            "container" | "folder" => Ok(NodeKind::Container),
            "artifact" | "file" => Ok(NodeKind::Artifact),
            "structural-unit" | "structural_unit" | "class" => Ok(NodeKind::StructuralUnit),
            "behavioral-unit" | "behavioral_unit" | "function" => Ok(NodeKind::BehavioralUnit),
            other => Err(format!("unknown node kind '{other}'")),
        }
    }
}

/// Content produced for a node once it passes verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedOutput {
    pub content: String,
    pub attempts: u32,
}

/// Free-form planning metadata attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    /// Target file path, relative to the generated artifact root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    /// Domain tags used by keyword matching.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<GeneratedOutput>,
}

/// A planning-graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub metadata: NodeMetadata,
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    /// Creates a PENDING node with empty metadata.
    pub fn new(id: impl Into<NodeId>, kind: NodeKind, name: impl Into<String>) -> Self {
        Node {
            id: id.into(),
            kind,
            name: name.into(),
            metadata: NodeMetadata::default(),
            status: NodeStatus::Pending,
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.metadata.doc = Some(doc.into());
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.metadata.signature = Some(signature.into());
        self
    }

    pub fn with_path_hint(mut self, path: impl Into<String>) -> Self {
        self.metadata.path_hint = Some(path.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// One-line description used in repair context and prompts.
    pub fn summary(&self) -> String {
        let mut out = format!("{} {} ({})", self.kind, self.name, self.id);
        if let Some(sig) = &self.metadata.signature {
            out.push_str(": ");
            out.push_str(sig);
        }
        if let Some(doc) = &self.metadata.doc {
            out.push_str(" - ");
            out.push_str(doc);
        }
        out
    }
}

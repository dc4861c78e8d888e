//! Collaborator contracts consumed by the generation controller.
//!
//! A [`Synthesizer`] turns a node description (plus, on repair attempts, a
//! [`RepairContext`]) into candidate content. A [`Verifier`] judges that
//! candidate. A [`TestAuthor`] writes the per-node test a verifier can
//! run, and an [`IntegrationCheck`] judges the finished workspace. All are
//! async and object-safe so the controller can hold
//! them as `Arc<dyn _>` and share them across worker tasks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rpgen_core::{Edge, Node, NodeId, NodeKind, NodeMetadata};

/// The slice of a node handed to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeBrief {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub metadata: NodeMetadata,
}

impl From<&Node> for NodeBrief {
    fn from(node: &Node) -> Self {
        NodeBrief {
            id: node.id.clone(),
            kind: node.kind,
            name: node.name.clone(),
            metadata: node.metadata.clone(),
        }
    }
}

/// A node quoted in a repair context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub id: NodeId,
    pub summary: String,
    /// Hops from the node under repair, for structural entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<usize>,
    /// Leading part of the entry's generated content, if it has passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// What a repair attempt knows about the attempts before it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairContext {
    /// The attempt about to be made (2 for the first repair).
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_candidate: Option<String>,
    /// Diagnostics of every failed attempt, oldest first.
    pub failures: Vec<String>,
    /// Ancestors over `depends_on`/`data_flow`, nearest first.
    pub dependencies: Vec<ContextEntry>,
    pub related: Vec<ContextEntry>,
}

impl RepairContext {
    pub fn last_failure(&self) -> Option<&str> {
        self.failures.last().map(String::as_str)
    }
}

/// Candidate content for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub content: String,
    /// Edges the synthesizer found the node needs. Applied to the graph
    /// before verification.
    pub discovered: Vec<Edge>,
}

impl Candidate {
    pub fn new(content: impl Into<String>) -> Self {
        Candidate {
            content: content.into(),
            discovered: Vec::new(),
        }
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.discovered.push(edge);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    /// The candidate is wrong.
    Fail { diagnostic: String },
    /// The check could not be carried out.
    EnvironmentError { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SynthesisError {
    /// The provider stayed unavailable after the adapter's own retries.
    #[error("synthesizer unavailable: {0}")]
    Transient(String),
    /// The provider answered with something that is not usable content.
    #[error("malformed candidate: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        node: &NodeBrief,
        repair: Option<&RepairContext>,
    ) -> Result<Candidate, SynthesisError>;
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, candidate: &Candidate, node: &NodeBrief) -> Verdict;
}

/// Writes a test for a node from its interface (signature, doc), before
/// and independently of any candidate.
#[async_trait]
pub trait TestAuthor: Send + Sync {
    async fn write_test(&self, node: &NodeBrief) -> Result<String, SynthesisError>;
}

/// A whole-workspace check run once every node has settled.
#[async_trait]
pub trait IntegrationCheck: Send + Sync {
    async fn check(&self) -> Verdict;
}

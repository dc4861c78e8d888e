//! The result of a build: one [`NodeReport`] per node plus aggregates,
//! and the post-build integration result when one was configured.

use serde::{Deserialize, Serialize};

use rpgen_core::{NodeId, NodeKind, NodeStatus};

use crate::collab::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every node passed.
    Completed,
    /// Some node failed behaviorally or was blocked by one that did.
    Partial,
    /// Some node failed because its environment budget ran out.
    EnvironmentFailure,
    Cancelled,
}

/// Why a node did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    Behavioral { diagnostic: String },
    Environment { detail: String },
    /// A `depends_on` predecessor ended FAILED or BLOCKED.
    BlockedBy { node: NodeId },
    Cancelled,
    /// The run stopped on a structural error.
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub attempts: u32,
    pub environment_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
    /// Hex blake3 digest of the passing content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Passed,
    Failed,
    /// The command could not run, or ran out of time.
    Error,
    /// Not attempted: the run was cancelled or nothing passed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationReport {
    pub status: IntegrationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntegrationReport {
    pub fn skipped(reason: impl Into<String>) -> Self {
        IntegrationReport {
            status: IntegrationStatus::Skipped,
            detail: Some(reason.into()),
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        IntegrationReport {
            status: IntegrationStatus::Error,
            detail: Some(detail.into()),
        }
    }
}

impl From<Verdict> for IntegrationReport {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => IntegrationReport {
                status: IntegrationStatus::Passed,
                detail: None,
            },
            Verdict::Fail { diagnostic } => IntegrationReport {
                status: IntegrationStatus::Failed,
                detail: Some(diagnostic),
            },
            Verdict::EnvironmentError { detail } => IntegrationReport::error(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    /// Processing order, as scheduled at the end of the run.
    pub order: Vec<NodeId>,
    /// Per-node results, in `order`.
    pub nodes: Vec<NodeReport>,
    pub passed: usize,
    pub failed: usize,
    pub blocked: usize,
    /// `passed / total`; 1.0 for an empty graph.
    pub pass_rate: f64,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration: Option<IntegrationReport>,
}

impl GenerationReport {
    pub(crate) fn assemble(order: Vec<NodeId>, nodes: Vec<NodeReport>, cancelled: bool) -> Self {
        let count = |status: NodeStatus| nodes.iter().filter(|n| n.status == status).count();
        let passed = count(NodeStatus::Passed);
        let failed = count(NodeStatus::Failed);
        let blocked = count(NodeStatus::Blocked);
        let pass_rate = if nodes.is_empty() {
            1.0
        } else {
            passed as f64 / nodes.len() as f64
        };
        let environment_failed = nodes
            .iter()
            .any(|n| matches!(n.failure, Some(FailureCause::Environment { .. })));
        let outcome = if cancelled {
            RunOutcome::Cancelled
        } else if environment_failed {
            RunOutcome::EnvironmentFailure
        } else if passed == nodes.len() {
            RunOutcome::Completed
        } else {
            RunOutcome::Partial
        };
        GenerationReport {
            order,
            nodes,
            passed,
            failed,
            blocked,
            pass_rate,
            outcome,
            integration: None,
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }

    /// Every node passed and the integration check, if any, did not fail.
    pub fn is_complete(&self) -> bool {
        let integrated = !matches!(
            self.integration.as_ref().map(|i| i.status),
            Some(IntegrationStatus::Failed | IntegrationStatus::Error)
        );
        self.outcome == RunOutcome::Completed && integrated
    }
}

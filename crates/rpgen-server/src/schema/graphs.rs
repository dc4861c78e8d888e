//! Graph inspection request/response types.

use serde::{Deserialize, Serialize};

use rpgen_core::{Advisory, GraphMetrics, GraphSnapshot, NodeId, RelatedNode, Violation};

/// Response from validating a graph document.
#[derive(Debug, Clone, Serialize)]
pub struct ValidateResponse {
    pub buildable: bool,
    pub violations: Vec<Violation>,
    /// Non-blocking findings; only computed for buildable graphs.
    pub advisories: Vec<Advisory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<GraphMetrics>,
}

/// Response from scheduling a graph document.
#[derive(Debug, Clone, Serialize)]
pub struct OrderResponse {
    pub order: Vec<NodeId>,
}

/// Request for nodes related to a query.
#[derive(Debug, Clone, Deserialize)]
pub struct RelatedRequest {
    pub graph: GraphSnapshot,
    pub query: String,
    /// Node whose structural neighborhood is always included.
    #[serde(default)]
    pub anchor: Option<NodeId>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Structural radius around the anchor.
    #[serde(default)]
    pub radius: Option<usize>,
}

fn default_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedResponse {
    pub related: Vec<RelatedNode>,
}

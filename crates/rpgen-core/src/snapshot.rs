//! The persisted graph document.
//!
//! A snapshot is the durable checkpoint format and the interchange format
//! with the planning phase: node list and edge list, in insertion order,
//! sufficient to rebuild a [`GraphStore`](crate::GraphStore) via
//! `GraphStore::restore`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::edge::Edge;
use crate::error::CoreError;
use crate::id::NodeId;
use crate::node::Node;
use crate::status::NodeStatus;

/// Current document version written by [`GraphStore::snapshot`](crate::GraphStore::snapshot).
pub const SNAPSHOT_VERSION: u32 = 1;

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Node statuses in document order.
    pub fn statuses(&self) -> Vec<(NodeId, NodeStatus)> {
        self.nodes
            .iter()
            .map(|node| (node.id.clone(), node.status))
            .collect()
    }
}

//! Progress stream published by the generation controller.
//!
//! Subscribers get every status transition in commit order. The channel is
//! a `tokio::sync::broadcast`, so a slow subscriber lags (and is told so by
//! `RecvError::Lagged`) instead of stalling the build.

use serde::Serialize;
use tokio::sync::broadcast;

use rpgen_core::{Edge, NodeId, NodeStatus};

use crate::report::RunOutcome;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        total: usize,
        order: Vec<NodeId>,
    },
    Transition {
        node: NodeId,
        from: NodeStatus,
        to: NodeStatus,
        attempt: u32,
    },
    EnvironmentRetry {
        node: NodeId,
        retry: u32,
        detail: String,
    },
    EdgeDiscovered {
        edge: Edge,
        reordered: bool,
    },
    RunFinished {
        outcome: RunOutcome,
        pass_rate: f64,
    },
}

#[derive(Debug, Clone)]
pub struct ProgressChannel {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressChannel {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        ProgressChannel { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Publishes to current subscribers. Having none is not an error.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        ProgressChannel::new(Self::DEFAULT_CAPACITY)
    }
}

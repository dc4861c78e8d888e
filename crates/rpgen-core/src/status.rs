//! Per-node generation lifecycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a node during a build.
///
/// `Passed`, `Blocked` and `Failed` are terminal. The legal moves are
/// encoded in [`NodeStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Synthesizing,
    Validating,
    Repairing,
    Passed,
    Blocked,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Passed | NodeStatus::Blocked | NodeStatus::Failed)
    }

    /// Whether a worker currently owns the node.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            NodeStatus::Synthesizing | NodeStatus::Validating | NodeStatus::Repairing
        )
    }

    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        match (self, next) {
            (Pending, Synthesizing) => true,
            (Synthesizing, Validating | Repairing | Failed) => true,
            (Validating, Passed | Repairing | Failed) => true,
            (Repairing, Synthesizing) => true,
            // Blocking covers both failed predecessors and cancellation.
            (current, Blocked) => !current.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Synthesizing => "synthesizing",
            NodeStatus::Validating => "validating",
            NodeStatus::Repairing => "repairing",
            NodeStatus::Passed => "passed",
            NodeStatus::Blocked => "blocked",
            NodeStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(NodeStatus::Pending),
            "synthesizing" => Ok(NodeStatus::Synthesizing),
            "validating" => Ok(NodeStatus::Validating),
            "repairing" => Ok(NodeStatus::Repairing),
            "passed" => Ok(NodeStatus::Passed),
            "blocked" => Ok(NodeStatus::Blocked),
            "failed" => Ok(NodeStatus::Failed),
            other => Err(format!("unknown node status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use NodeStatus::*;

    #[test]
    fn happy_path_is_legal() {
        assert!(Pending.can_transition_to(Synthesizing));
        assert!(Synthesizing.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Passed));
    }

    #[test]
    fn repair_loop_is_legal() {
        assert!(Validating.can_transition_to(Repairing));
        assert!(Repairing.can_transition_to(Synthesizing));
        assert!(Validating.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [Passed, Blocked, Failed] {
            for next in [Pending, Synthesizing, Validating, Repairing, Passed, Blocked, Failed] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn pending_cannot_skip_synthesis() {
        assert!(!Pending.can_transition_to(Validating));
        assert!(!Pending.can_transition_to(Passed));
        assert!(Pending.can_transition_to(Blocked));
    }

    #[test]
    fn display_is_uppercase_and_parse_is_case_insensitive() {
        assert_eq!(Passed.to_string(), "PASSED");
        assert_eq!("BLOCKED".parse::<NodeStatus>().unwrap(), Blocked);
        assert_eq!("repairing".parse::<NodeStatus>().unwrap(), Repairing);
        assert!("done".parse::<NodeStatus>().is_err());
    }
}

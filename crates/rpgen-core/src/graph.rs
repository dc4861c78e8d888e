//! GraphStore: the single owner of planning nodes and typed edges.
//!
//! Nodes and edges live in a petgraph `StableDiGraph`, so indices stay
//! valid across edge removal. Two `IndexMap`s map stable ids to graph
//! indices and remember insertion order, which the scheduler uses as its
//! final tie-break and which snapshots preserve.
//!
//! Mutations are all-or-nothing: every check runs before the graph is
//! touched, so a rejected mutation leaves the store unchanged.

use std::collections::{BTreeMap, HashSet, VecDeque};

use indexmap::IndexMap;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;

use crate::edge::{Edge, EdgeKey, EdgeKind};
use crate::error::CoreError;
use crate::id::NodeId;
use crate::node::{GeneratedOutput, Node, NodeKind};
use crate::snapshot::{GraphSnapshot, SNAPSHOT_VERSION};
use crate::status::NodeStatus;

/// Node and edge counts per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphMetrics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub nodes_by_kind: BTreeMap<NodeKind, usize>,
    pub edges_by_kind: BTreeMap<EdgeKind, usize>,
}

/// The planning graph.
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    graph: StableDiGraph<Node, Edge>,
    /// Node id -> graph index, in insertion order.
    nodes: IndexMap<NodeId, NodeIndex>,
    /// Edge identity -> graph index, in insertion order.
    edges: IndexMap<EdgeKey, EdgeIndex>,
    /// Graph-level planning metadata carried through snapshots.
    metadata: BTreeMap<String, serde_json::Value>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn contains_edge(&self, key: &EdgeKey) -> bool {
        self.edges.contains_key(key)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes
            .get(id)
            .and_then(|&ix| self.graph.node_weight(ix))
    }

    /// Returns the node with the given id or `NodeNotFound`.
    pub fn get_node(&self, id: &str) -> Result<&Node, CoreError> {
        self.node(id)
            .ok_or_else(|| CoreError::NodeNotFound { id: id.into() })
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes
            .values()
            .filter_map(move |&ix| self.graph.node_weight(ix))
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.edges
            .values()
            .filter_map(move |&ix| self.graph.edge_weight(ix))
    }

    /// Insertion sequence number of a node.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.nodes.get_index_of(id)
    }

    pub fn node_at(&self, position: usize) -> Option<&Node> {
        self.nodes
            .get_index(position)
            .and_then(|(_, &ix)| self.graph.node_weight(ix))
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn metrics(&self) -> GraphMetrics {
        let mut metrics = GraphMetrics {
            total_nodes: self.node_count(),
            total_edges: self.edge_count(),
            ..GraphMetrics::default()
        };
        for node in self.nodes() {
            *metrics.nodes_by_kind.entry(node.kind).or_default() += 1;
        }
        for edge in self.edges() {
            *metrics.edges_by_kind.entry(edge.kind).or_default() += 1;
        }
        metrics
    }

    // -----------------------------------------------------------------------
    // Node mutations
    // -----------------------------------------------------------------------

    /// Adds a node. Fails with `DuplicateNode` if the id is taken.
    pub fn add_node(&mut self, node: Node) -> Result<(), CoreError> {
        if self.nodes.contains_key(&node.id) {
            return Err(CoreError::DuplicateNode { id: node.id });
        }
        let id = node.id.clone();
        let ix = self.graph.add_node(node);
        self.nodes.insert(id, ix);
        Ok(())
    }

    /// Moves a node to `next`, enforcing the lifecycle state machine.
    ///
    /// Returns the previous status.
    pub fn set_status(&mut self, id: &str, next: NodeStatus) -> Result<NodeStatus, CoreError> {
        let node = self.node_mut(id)?;
        let current = node.status;
        if !current.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                id: node.id.clone(),
                current,
                next,
            });
        }
        node.status = next;
        Ok(current)
    }

    /// Stores the passing candidate for a node.
    pub fn record_output(&mut self, id: &str, output: GeneratedOutput) -> Result<(), CoreError> {
        self.node_mut(id)?.metadata.output = Some(output);
        Ok(())
    }

    /// Resets every node that has not PASSED back to PENDING so a restored
    /// graph can be built again. Returns the ids that were reset.
    pub fn reset_unfinished(&mut self) -> Vec<NodeId> {
        let mut reset = Vec::new();
        for &ix in self.nodes.values() {
            if let Some(node) = self.graph.node_weight_mut(ix) {
                if node.status != NodeStatus::Passed && node.status != NodeStatus::Pending {
                    node.status = NodeStatus::Pending;
                    reset.push(node.id.clone());
                }
            }
        }
        reset
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut Node, CoreError> {
        let ix = self.index_of(id)?;
        self.graph
            .node_weight_mut(ix)
            .ok_or_else(|| CoreError::NodeNotFound { id: id.into() })
    }

    // -----------------------------------------------------------------------
    // Edge mutations
    // -----------------------------------------------------------------------

    /// Adds an edge after checking referential integrity and kind legality.
    ///
    /// Returns `Ok(false)` without changing anything when an edge with the
    /// same (source, target, kind) already exists. Ordering cycles are
    /// admitted here so the validator can report them; use
    /// [`GraphStore::add_edge_acyclic`] during a run.
    pub fn add_edge(&mut self, edge: Edge) -> Result<bool, CoreError> {
        let (from, to) = self.check_edge(&edge)?;
        let key = edge.key();
        if self.edges.contains_key(&key) {
            return Ok(false);
        }
        let ix = self.graph.add_edge(from, to, edge);
        self.edges.insert(key, ix);
        Ok(true)
    }

    /// Like [`GraphStore::add_edge`], but keeps the graph buildable: an
    /// ordering edge that would close a cycle fails with `CycleIntroduced`,
    /// a `contains` edge into a child that already has a parent fails with
    /// `ParentConflict`. The store is unchanged on error.
    pub fn add_edge_acyclic(&mut self, edge: Edge) -> Result<bool, CoreError> {
        let (from, to) = self.check_edge(&edge)?;
        let key = edge.key();
        if self.edges.contains_key(&key) {
            return Ok(false);
        }
        if edge.kind == EdgeKind::Contains {
            if let Some(existing) = self.parent(&edge.target)? {
                return Err(CoreError::ParentConflict {
                    child: edge.target,
                    parent: edge.source,
                    existing,
                });
            }
        }
        if edge.kind.is_ordering() && self.reaches_via_ordering(to, from) {
            return Err(CoreError::CycleIntroduced {
                from: edge.source,
                to: edge.target,
                kind: edge.kind,
            });
        }
        let ix = self.graph.add_edge(from, to, edge);
        self.edges.insert(key, ix);
        Ok(true)
    }

    pub fn remove_edge(&mut self, key: &EdgeKey) -> Result<Edge, CoreError> {
        let not_found = || CoreError::EdgeNotFound {
            from: key.source.clone(),
            to: key.target.clone(),
            kind: key.kind,
        };
        let ix = self.edges.shift_remove(key).ok_or_else(not_found)?;
        self.graph.remove_edge(ix).ok_or_else(not_found)
    }

    fn check_edge(&self, edge: &Edge) -> Result<(NodeIndex, NodeIndex), CoreError> {
        let dangling = |missing: &NodeId| CoreError::DanglingEdge {
            from: edge.source.clone(),
            to: edge.target.clone(),
            kind: edge.kind,
            missing: missing.clone(),
        };
        let from = *self
            .nodes
            .get(&edge.source)
            .ok_or_else(|| dangling(&edge.source))?;
        let to = *self
            .nodes
            .get(&edge.target)
            .ok_or_else(|| dangling(&edge.target))?;

        let invalid = |reason: String| CoreError::InvalidEdgeKind {
            from: edge.source.clone(),
            to: edge.target.clone(),
            kind: edge.kind,
            reason,
        };
        if from == to {
            return Err(invalid("self-loops are not allowed".into()));
        }
        let source_kind = self.graph[from].kind;
        let target_kind = self.graph[to].kind;
        edge.kind
            .check_endpoints(source_kind, target_kind)
            .map_err(invalid)?;
        Ok((from, to))
    }

    fn reaches_via_ordering(&self, start: NodeIndex, goal: NodeIndex) -> bool {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(ix) = queue.pop_front() {
            if ix == goal {
                return true;
            }
            for edge in self.graph.edges_directed(ix, Direction::Outgoing) {
                if edge.weight().kind.is_ordering() && seen.insert(edge.target()) {
                    queue.push_back(edge.target());
                }
            }
        }
        false
    }

    // -----------------------------------------------------------------------
    // Adjacency queries
    // -----------------------------------------------------------------------

    /// Ids adjacent to `id` over edges of `kind` in `direction`, in node
    /// insertion order. Empty if there are none.
    pub fn neighbors(
        &self,
        id: &str,
        kind: EdgeKind,
        direction: Direction,
    ) -> Result<Vec<NodeId>, CoreError> {
        self.adjacent(id, direction, |k| k == kind)
    }

    /// Predecessors over `depends_on` and `order` edges.
    pub fn ordering_predecessors(&self, id: &str) -> Result<Vec<NodeId>, CoreError> {
        self.adjacent(id, Direction::Incoming, EdgeKind::is_ordering)
    }

    /// Successors over `depends_on` and `order` edges.
    pub fn ordering_successors(&self, id: &str) -> Result<Vec<NodeId>, CoreError> {
        self.adjacent(id, Direction::Outgoing, EdgeKind::is_ordering)
    }

    /// The `contains` parent of a node, if any.
    pub fn parent(&self, id: &str) -> Result<Option<NodeId>, CoreError> {
        Ok(self
            .neighbors(id, EdgeKind::Contains, Direction::Incoming)?
            .into_iter()
            .next())
    }

    pub(crate) fn adjacent(
        &self,
        id: &str,
        direction: Direction,
        accept: impl Fn(EdgeKind) -> bool,
    ) -> Result<Vec<NodeId>, CoreError> {
        let ix = self.index_of(id)?;
        let mut found: Vec<(usize, &NodeId)> = Vec::new();
        for edge in self.graph.edges_directed(ix, direction) {
            let weight = edge.weight();
            if !accept(weight.kind) {
                continue;
            }
            let other = match direction {
                Direction::Outgoing => &weight.target,
                Direction::Incoming => &weight.source,
            };
            if let Some(pos) = self.position(other) {
                found.push((pos, other));
            }
        }
        found.sort_by_key(|&(pos, _)| pos);
        found.dedup_by_key(|&mut (pos, _)| pos);
        Ok(found.into_iter().map(|(_, id)| id.clone()).collect())
    }

    /// Ordering edges as (source position, target position) pairs.
    pub(crate) fn ordering_pairs(&self) -> Vec<(usize, usize)> {
        self.edges()
            .filter(|edge| edge.kind.is_ordering())
            .filter_map(|edge| Some((self.position(&edge.source)?, self.position(&edge.target)?)))
            .collect()
    }

    fn index_of(&self, id: &str) -> Result<NodeIndex, CoreError> {
        self.nodes
            .get(id)
            .copied()
            .ok_or_else(|| CoreError::NodeNotFound { id: id.into() })
    }

    // -----------------------------------------------------------------------
    // Snapshot / restore
    // -----------------------------------------------------------------------

    /// Serializable copy of the whole graph, nodes and edges in insertion order.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            version: SNAPSHOT_VERSION,
            metadata: self.metadata.clone(),
            nodes: self.nodes().cloned().collect(),
            edges: self.edges().cloned().collect(),
        }
    }

    /// Rebuilds a store from a snapshot, preserving order and statuses.
    ///
    /// Goes through the checked mutation path, so a corrupt snapshot fails
    /// with the same errors as the equivalent sequence of mutations.
    pub fn restore(snapshot: GraphSnapshot) -> Result<Self, CoreError> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(CoreError::UnsupportedSnapshotVersion {
                found: snapshot.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        let mut store = GraphStore {
            metadata: snapshot.metadata,
            ..GraphStore::default()
        };
        for node in snapshot.nodes {
            store.add_node(node)?;
        }
        for edge in snapshot.edges {
            store.add_edge(edge)?;
        }
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::Validator;

    fn sample() -> GraphStore {
        let mut g = GraphStore::new();
        g.add_node(Node::new("auth", NodeKind::Capability, "Authentication")).unwrap();
        g.add_node(Node::new("auth.rs", NodeKind::Artifact, "auth.rs")).unwrap();
        g.add_node(Node::new("login", NodeKind::BehavioralUnit, "login")).unwrap();
        g.add_edge(Edge::depends_on("auth", "auth.rs")).unwrap();
        g.add_edge(Edge::depends_on("auth", "login")).unwrap();
        g.add_edge(Edge::contains("auth.rs", "login")).unwrap();
        g
    }

    #[test]
    fn add_and_get_node() {
        let g = sample();
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.get_node("login").unwrap().kind, NodeKind::BehavioralUnit);
        assert_eq!(g.position("login"), Some(2));
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut g = sample();
        let err = g
            .add_node(Node::new("auth", NodeKind::Container, "again"))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateNode { .. }));
        assert_eq!(g.node_count(), 3);
    }

    #[test]
    fn get_missing_node_fails() {
        let g = sample();
        assert!(matches!(
            g.get_node("nope"),
            Err(CoreError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn dangling_edge_leaves_store_unchanged() {
        let mut g = sample();
        let err = g.add_edge(Edge::depends_on("auth", "missing")).unwrap_err();
        match err {
            CoreError::DanglingEdge { missing, .. } => assert_eq!(missing.as_str(), "missing"),
            other => panic!("expected DanglingEdge, got {other:?}"),
        }
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn capability_cannot_be_contained() {
        let mut g = sample();
        let err = g.add_edge(Edge::contains("auth.rs", "auth")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidEdgeKind { .. }));
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn self_loop_rejected() {
        let mut g = sample();
        let err = g
            .add_edge(Edge::new("login", "login", EdgeKind::DataFlow))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidEdgeKind { .. }));
    }

    #[test]
    fn duplicate_edge_is_idempotent() {
        let mut g = sample();
        assert!(!g.add_edge(Edge::depends_on("auth", "login")).unwrap());
        assert_eq!(g.edge_count(), 3);
        // Same endpoints, different kind, is a different edge.
        assert!(g.add_edge(Edge::new("auth", "login", EdgeKind::Order)).unwrap());
        assert_eq!(g.edge_count(), 4);
    }

    #[test]
    fn neighbors_by_kind_and_direction() {
        let g = sample();
        let out = g
            .neighbors("auth", EdgeKind::DependsOn, Direction::Outgoing)
            .unwrap();
        assert_eq!(out, vec![NodeId::from("auth.rs"), NodeId::from("login")]);
        let incoming = g
            .neighbors("login", EdgeKind::Contains, Direction::Incoming)
            .unwrap();
        assert_eq!(incoming, vec![NodeId::from("auth.rs")]);
        assert!(g
            .neighbors("login", EdgeKind::DataFlow, Direction::Outgoing)
            .unwrap()
            .is_empty());
        assert_eq!(g.parent("login").unwrap(), Some(NodeId::from("auth.rs")));
        assert_eq!(g.parent("auth").unwrap(), None);
    }

    #[test]
    fn ordering_predecessors_merge_kinds() {
        let mut g = sample();
        g.add_edge(Edge::new("auth.rs", "login", EdgeKind::Order)).unwrap();
        assert_eq!(
            g.ordering_predecessors("login").unwrap(),
            vec![NodeId::from("auth"), NodeId::from("auth.rs")]
        );
    }

    #[test]
    fn acyclic_add_rejects_cycle_and_keeps_store() {
        let mut g = sample();
        g.add_edge(Edge::depends_on("auth.rs", "login")).unwrap();
        let err = g.add_edge_acyclic(Edge::depends_on("login", "auth")).unwrap_err();
        assert!(matches!(err, CoreError::CycleIntroduced { .. }));
        assert_eq!(g.edge_count(), 4);

        // Non-ordering edges never close a cycle.
        assert!(g
            .add_edge_acyclic(Edge::new("login", "auth", EdgeKind::DataFlow))
            .unwrap());
    }

    #[test]
    fn acyclic_add_keeps_a_single_contains_parent() {
        let mut g = sample();
        g.add_node(Node::new("session.rs", NodeKind::Artifact, "session.rs")).unwrap();
        let err = g
            .add_edge_acyclic(Edge::contains("session.rs", "login"))
            .unwrap_err();
        match err {
            CoreError::ParentConflict { child, existing, .. } => {
                assert_eq!(child.as_str(), "login");
                assert_eq!(existing.as_str(), "auth.rs");
            }
            other => panic!("expected ParentConflict, got {other:?}"),
        }
        assert_eq!(g.edge_count(), 3);
        assert!(Validator::validate(&g).is_empty());

        // Re-adding the existing parent is still idempotent.
        assert!(!g.add_edge_acyclic(Edge::contains("auth.rs", "login")).unwrap());
    }

    #[test]
    fn remove_edge() {
        let mut g = sample();
        let key = Edge::depends_on("auth", "login").key();
        let removed = g.remove_edge(&key).unwrap();
        assert_eq!(removed.kind, EdgeKind::DependsOn);
        assert_eq!(g.edge_count(), 2);
        assert!(matches!(
            g.remove_edge(&key),
            Err(CoreError::EdgeNotFound { .. })
        ));
    }

    #[test]
    fn status_transitions_are_checked() {
        let mut g = sample();
        assert_eq!(
            g.set_status("auth", NodeStatus::Synthesizing).unwrap(),
            NodeStatus::Pending
        );
        let err = g.set_status("auth", NodeStatus::Pending).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        assert_eq!(g.get_node("auth").unwrap().status, NodeStatus::Synthesizing);
    }

    #[test]
    fn reset_unfinished_keeps_passed() {
        let mut g = sample();
        for status in [NodeStatus::Synthesizing, NodeStatus::Validating, NodeStatus::Passed] {
            g.set_status("auth", status).unwrap();
        }
        g.set_status("login", NodeStatus::Blocked).unwrap();
        let reset = g.reset_unfinished();
        assert_eq!(reset, vec![NodeId::from("login")]);
        assert_eq!(g.get_node("auth").unwrap().status, NodeStatus::Passed);
        assert_eq!(g.get_node("login").unwrap().status, NodeStatus::Pending);
    }

    #[test]
    fn record_output_lands_in_metadata() {
        let mut g = sample();
        g.record_output(
            "login",
            GeneratedOutput {
                content: "fn login() {}".into(),
                attempts: 2,
            },
        )
        .unwrap();
        let output = g.get_node("login").unwrap().metadata.output.as_ref().unwrap();
        assert_eq!(output.attempts, 2);
    }

    #[test]
    fn metrics_count_by_kind() {
        let m = sample().metrics();
        assert_eq!(m.total_nodes, 3);
        assert_eq!(m.total_edges, 3);
        assert_eq!(m.nodes_by_kind[&NodeKind::Capability], 1);
        assert_eq!(m.edges_by_kind[&EdgeKind::DependsOn], 2);
        assert_eq!(m.edges_by_kind.get(&EdgeKind::Order), None);
    }

    #[test]
    fn snapshot_restore_preserves_order_and_status() {
        let mut g = sample();
        g.set_status("login", NodeStatus::Blocked).unwrap();
        g.set_metadata("project", serde_json::json!("demo"));

        let restored = GraphStore::restore(g.snapshot()).unwrap();
        let ids: Vec<&str> = restored.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["auth", "auth.rs", "login"]);
        assert_eq!(restored.get_node("login").unwrap().status, NodeStatus::Blocked);
        assert_eq!(restored.snapshot(), g.snapshot());
    }

    #[test]
    fn restore_rejects_future_version() {
        let mut snapshot = sample().snapshot();
        snapshot.version = SNAPSHOT_VERSION + 1;
        assert!(matches!(
            GraphStore::restore(snapshot),
            Err(CoreError::UnsupportedSnapshotVersion { .. })
        ));
    }
}

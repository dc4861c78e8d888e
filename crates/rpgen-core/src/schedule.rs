//! Deterministic processing order.
//!
//! [`Scheduler::plan`] runs Kahn's algorithm over `depends_on` and `order`
//! edges, breaking ties among ready nodes by kind priority and then by
//! insertion sequence. The resulting [`Schedule`] tracks which nodes a run
//! has already processed and absorbs edges discovered mid-run.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::edge::{Edge, EdgeKind};
use crate::error::CoreError;
use crate::graph::GraphStore;
use crate::id::NodeId;
use crate::status::NodeStatus;

pub(crate) struct KahnOutcome {
    pub order: Vec<usize>,
    /// Indices never released: cycle members and their descendants.
    pub remaining: Vec<usize>,
}

/// Kahn's algorithm over `count` nodes. Ready nodes are released by
/// `(priority(i), i)`, smallest first.
pub(crate) fn kahn(
    count: usize,
    pairs: &[(usize, usize)],
    priority: impl Fn(usize) -> u8,
) -> KahnOutcome {
    let mut indegree = vec![0usize; count];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(from, to) in pairs {
        successors[from].push(to);
        indegree[to] += 1;
    }

    let mut ready: BinaryHeap<Reverse<(u8, usize)>> = (0..count)
        .filter(|&i| indegree[i] == 0)
        .map(|i| Reverse((priority(i), i)))
        .collect();
    let mut order = Vec::with_capacity(count);
    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        for &next in &successors[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push(Reverse((priority(next), next)));
            }
        }
    }

    let remaining = (0..count).filter(|&i| indegree[i] > 0).collect();
    KahnOutcome { order, remaining }
}

pub struct Scheduler;

impl Scheduler {
    /// Every node exactly once, each after all of its ordering predecessors.
    pub fn order(graph: &GraphStore) -> Result<Vec<NodeId>, CoreError> {
        Ok(Self::plan(graph)?.order)
    }

    pub fn plan(graph: &GraphStore) -> Result<Schedule, CoreError> {
        let ids: Vec<&NodeId> = graph.nodes().map(|n| &n.id).collect();
        let priorities: Vec<u8> = graph.nodes().map(|n| n.kind.priority()).collect();
        let outcome = kahn(ids.len(), &graph.ordering_pairs(), |i| priorities[i]);
        if !outcome.remaining.is_empty() {
            return Err(CoreError::CycleDetected {
                nodes: outcome.remaining.iter().map(|&i| ids[i].clone()).collect(),
            });
        }
        Ok(Schedule::from_order(
            outcome.order.into_iter().map(|i| ids[i].clone()).collect(),
        ))
    }
}

/// A processing order plus the set of nodes a run has already taken.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    order: Vec<NodeId>,
    positions: HashMap<NodeId, usize>,
    processed: HashSet<NodeId>,
}

impl Schedule {
    fn from_order(order: Vec<NodeId>) -> Self {
        let positions = order
            .iter()
            .enumerate()
            .map(|(pos, id)| (id.clone(), pos))
            .collect();
        Schedule {
            order,
            positions,
            processed: HashSet::new(),
        }
    }

    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Records that a run has taken `id`. Returns `false` if it was already
    /// processed or is not part of the schedule.
    pub fn mark_processed(&mut self, id: &str) -> bool {
        match self.positions.get_key_value(id) {
            Some((key, _)) => self.processed.insert(key.clone()),
            None => false,
        }
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Unprocessed nodes in schedule order.
    pub fn pending(&self) -> impl Iterator<Item = &NodeId> + '_ {
        self.order
            .iter()
            .filter(move |id| !self.processed.contains(id.as_str()))
    }

    /// Reconciles the schedule with an edge just added to `graph`.
    ///
    /// Returns `Ok(true)` when the unprocessed suffix was recomputed.
    /// An ordering edge into an already processed target is a
    /// `RetroactiveDependency` unless the source came first and has
    /// already settled: PASSED for `depends_on`, terminal for `order`.
    pub fn reorder_after_mutation(
        &mut self,
        graph: &GraphStore,
        edge: &Edge,
    ) -> Result<bool, CoreError> {
        let grown = graph.node_count() != self.order.len();
        if !edge.kind.is_ordering() {
            if grown {
                self.recompute_unprocessed(graph)?;
            }
            return Ok(grown);
        }

        let source_done = self.is_processed(&edge.source);
        let target_done = self.is_processed(&edge.target);
        let retroactive = || CoreError::RetroactiveDependency {
            from: edge.source.clone(),
            to: edge.target.clone(),
        };
        match (source_done, target_done) {
            (false, true) => Err(retroactive()),
            (true, true) => match (self.position(&edge.source), self.position(&edge.target)) {
                (Some(s), Some(t)) if s < t && source_settled(graph, edge) => Ok(false),
                _ => Err(retroactive()),
            },
            (true, false) if !grown => Ok(false),
            (false, false) if !grown => {
                match (self.position(&edge.source), self.position(&edge.target)) {
                    (Some(s), Some(t)) if s < t => Ok(false),
                    _ => {
                        self.recompute_unprocessed(graph)?;
                        Ok(true)
                    }
                }
            }
            _ => {
                self.recompute_unprocessed(graph)?;
                Ok(true)
            }
        }
    }

    /// Keeps processed nodes in place and re-runs Kahn over the rest.
    fn recompute_unprocessed(&mut self, graph: &GraphStore) -> Result<(), CoreError> {
        let pending: Vec<&NodeId> = graph
            .nodes()
            .map(|n| &n.id)
            .filter(|id| !self.processed.contains(id.as_str()))
            .collect();
        let local: HashMap<&NodeId, usize> =
            pending.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        let pairs: Vec<(usize, usize)> = graph
            .edges()
            .filter(|e| e.kind.is_ordering())
            .filter_map(|e| Some((*local.get(&e.source)?, *local.get(&e.target)?)))
            .collect();
        let priority = |i: usize| {
            graph
                .node(pending[i])
                .map_or(u8::MAX, |n| n.kind.priority())
        };

        let outcome = kahn(pending.len(), &pairs, priority);
        if !outcome.remaining.is_empty() {
            return Err(CoreError::CycleDetected {
                nodes: outcome.remaining.iter().map(|&i| pending[i].clone()).collect(),
            });
        }

        let mut order: Vec<NodeId> = self
            .order
            .iter()
            .filter(|id| self.processed.contains(id.as_str()))
            .cloned()
            .collect();
        order.extend(outcome.order.into_iter().map(|i| pending[i].clone()));
        let processed = std::mem::take(&mut self.processed);
        *self = Schedule::from_order(order);
        self.processed = processed;
        Ok(())
    }
}

/// Whether the source of an ordering edge is finished in the way the edge
/// kind requires of a prerequisite.
fn source_settled(graph: &GraphStore, edge: &Edge) -> bool {
    let Some(source) = graph.node(&edge.source) else {
        return false;
    };
    match edge.kind {
        EdgeKind::DependsOn => source.status == NodeStatus::Passed,
        _ => source.status.is_terminal(),
    }
}

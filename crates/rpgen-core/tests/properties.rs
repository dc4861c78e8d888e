use std::collections::HashMap;

use proptest::prelude::*;
use rpgen_core::{
    CoreError, Edge, EdgeKind, GraphStore, Node, NodeId, NodeKind, Scheduler, Validator, Violation,
};

/// Builds a graph whose ordering edges all point from a lower to a higher
/// insertion index, which makes it acyclic by construction.
fn dag(kinds: &[usize], raw_edges: &[(usize, usize, bool)]) -> GraphStore {
    let mut g = GraphStore::new();
    for (i, &k) in kinds.iter().enumerate() {
        let kind = NodeKind::ALL[k % NodeKind::ALL.len()];
        g.add_node(Node::new(format!("n{i}"), kind, format!("node {i}")))
            .unwrap();
    }
    let n = kinds.len();
    for &(a, b, use_order) in raw_edges {
        let (a, b) = (a % n, b % n);
        if a >= b {
            continue;
        }
        let kind = if use_order {
            EdgeKind::Order
        } else {
            EdgeKind::DependsOn
        };
        g.add_edge(Edge::new(format!("n{a}"), format!("n{b}"), kind))
            .unwrap();
    }
    g
}

fn graph_strategy() -> impl Strategy<Value = (Vec<usize>, Vec<(usize, usize, bool)>)> {
    (1..24usize).prop_flat_map(|n| {
        (
            proptest::collection::vec(0..5usize, n),
            proptest::collection::vec((0..n, 0..n, any::<bool>()), 0..60),
        )
    })
}

proptest! {
    #[test]
    fn prop_order_respects_every_ordering_edge((kinds, edges) in graph_strategy()) {
        let g = dag(&kinds, &edges);
        prop_assert!(Validator::validate(&g).is_empty());

        let order = Scheduler::order(&g).unwrap();
        prop_assert_eq!(order.len(), g.node_count());

        let position: HashMap<&NodeId, usize> =
            order.iter().enumerate().map(|(i, id)| (id, i)).collect();
        prop_assert_eq!(position.len(), order.len());
        for edge in g.edges().filter(|e| e.kind.is_ordering()) {
            prop_assert!(position[&edge.source] < position[&edge.target]);
        }
    }

    #[test]
    fn prop_order_is_stable_across_invocations((kinds, edges) in graph_strategy()) {
        let g = dag(&kinds, &edges);
        let first = Scheduler::order(&g).unwrap();
        prop_assert_eq!(Scheduler::order(&g).unwrap(), first.clone());

        let restored = GraphStore::restore(g.snapshot()).unwrap();
        prop_assert_eq!(Scheduler::order(&restored).unwrap(), first);
    }

    #[test]
    fn prop_cycle_members_are_all_reported(
        (kinds, edges) in graph_strategy(),
        cycle_len in 2..6usize,
    ) {
        let mut g = dag(&kinds, &edges);
        // Close a cycle over a run of fresh nodes appended at the end.
        let base = g.node_count();
        for i in 0..cycle_len {
            g.add_node(Node::new(format!("c{i}"), NodeKind::Artifact, "cycle")).unwrap();
            if i > 0 {
                g.add_edge(Edge::depends_on(format!("c{}", i - 1), format!("c{i}"))).unwrap();
            }
        }
        g.add_edge(Edge::new(format!("c{}", cycle_len - 1), "c0", EdgeKind::Order)).unwrap();
        prop_assert_eq!(g.node_count(), base + cycle_len);

        let violations = Validator::validate(&g);
        let reported: Vec<&NodeId> = violations
            .iter()
            .filter_map(|v| match v {
                Violation::Cycle { nodes } => Some(nodes),
                _ => None,
            })
            .flatten()
            .collect();
        for i in 0..cycle_len {
            let id = NodeId::from(format!("c{i}"));
            prop_assert!(reported.contains(&&id));
        }
        let is_cycle_error = matches!(Scheduler::order(&g), Err(CoreError::CycleDetected { .. }));
        prop_assert!(is_cycle_error);
    }

    #[test]
    fn prop_forward_edges_never_break_a_running_schedule(
        (kinds, edges) in graph_strategy(),
        done in 0..24usize,
        pick in any::<(usize, usize)>(),
    ) {
        let mut g = dag(&kinds, &edges);
        let mut schedule = Scheduler::plan(&g).unwrap();
        let order = schedule.order().to_vec();
        let done = done.min(order.len());
        for id in &order[..done] {
            schedule.mark_processed(id);
        }
        if done == 0 || done == order.len() {
            return Ok(());
        }

        // Processed source, unprocessed target.
        let source = order[pick.0 % done].clone();
        let target = order[done + pick.1 % (order.len() - done)].clone();
        let edge = Edge::depends_on(source, target);
        if g.add_edge_acyclic(edge.clone()).is_ok() {
            schedule.reorder_after_mutation(&g, &edge).unwrap();
            let position: HashMap<&NodeId, usize> =
                schedule.order().iter().enumerate().map(|(i, id)| (id, i)).collect();
            for e in g.edges().filter(|e| e.kind.is_ordering()) {
                prop_assert!(position[&e.source] < position[&e.target]);
            }
        }
    }
}

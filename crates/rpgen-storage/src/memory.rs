//! In-memory implementation of [`CheckpointStore`].
//!
//! [`InMemoryStore`] backs tests and ephemeral builds. It keeps each run as
//! a [`GraphSnapshot`] and has the same semantics as the SQLite backend.

use std::collections::BTreeMap;

use rpgen_core::{Edge, GraphSnapshot, Node, NodeId, NodeStatus, SNAPSHOT_VERSION};

use crate::error::StorageError;
use crate::hash::structure_digest;
use crate::traits::CheckpointStore;
use crate::types::{RunId, RunSummary};

#[derive(Debug, Clone)]
struct StoredRun {
    name: String,
    snapshot: GraphSnapshot,
    digest: String,
}

impl StoredRun {
    fn node_mut(&mut self, run: RunId, id: &NodeId) -> Result<&mut Node, StorageError> {
        self.snapshot
            .nodes
            .iter_mut()
            .find(|n| &n.id == id)
            .ok_or_else(|| StorageError::NodeNotFound {
                run: run.0,
                node: id.to_string(),
            })
    }
}

fn empty_snapshot() -> GraphSnapshot {
    GraphSnapshot {
        version: SNAPSHOT_VERSION,
        metadata: BTreeMap::new(),
        nodes: Vec::new(),
        edges: Vec::new(),
    }
}

#[derive(Debug)]
pub struct InMemoryStore {
    runs: BTreeMap<i64, StoredRun>,
    next_id: i64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            runs: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn run(&self, run: RunId) -> Result<&StoredRun, StorageError> {
        self.runs.get(&run.0).ok_or(StorageError::RunNotFound(run.0))
    }

    fn run_mut(&mut self, run: RunId) -> Result<&mut StoredRun, StorageError> {
        self.runs
            .get_mut(&run.0)
            .ok_or(StorageError::RunNotFound(run.0))
    }
}

impl CheckpointStore for InMemoryStore {
    fn create_run(&mut self, name: &str) -> Result<RunId, StorageError> {
        let id = self.next_id;
        self.next_id += 1;
        let snapshot = empty_snapshot();
        let digest = structure_digest(&snapshot).to_hex().to_string();
        self.runs.insert(
            id,
            StoredRun {
                name: name.to_string(),
                snapshot,
                digest,
            },
        );
        Ok(RunId(id))
    }

    fn list_runs(&self) -> Result<Vec<RunSummary>, StorageError> {
        Ok(self
            .runs
            .iter()
            .map(|(&id, run)| RunSummary {
                id: RunId(id),
                name: run.name.clone(),
                node_count: run.snapshot.nodes.len(),
                digest: run.digest.clone(),
            })
            .collect())
    }

    fn delete_run(&mut self, run: RunId) -> Result<(), StorageError> {
        self.runs
            .remove(&run.0)
            .map(|_| ())
            .ok_or(StorageError::RunNotFound(run.0))
    }

    fn save_snapshot(&mut self, run: RunId, snapshot: &GraphSnapshot) -> Result<(), StorageError> {
        let stored = self.run_mut(run)?;
        stored.snapshot = snapshot.clone();
        stored.digest = structure_digest(snapshot).to_hex().to_string();
        Ok(())
    }

    fn load_snapshot(&self, run: RunId) -> Result<GraphSnapshot, StorageError> {
        let stored = self.run(run)?;
        let actual = structure_digest(&stored.snapshot).to_hex().to_string();
        if actual != stored.digest {
            return Err(StorageError::IntegrityError {
                reason: format!("run {run}: digest {actual} does not match {}", stored.digest),
            });
        }
        Ok(stored.snapshot.clone())
    }

    fn update_status(
        &mut self,
        run: RunId,
        node: &NodeId,
        status: NodeStatus,
    ) -> Result<(), StorageError> {
        self.run_mut(run)?.node_mut(run, node)?.status = status;
        Ok(())
    }

    fn update_node(&mut self, run: RunId, node: &Node) -> Result<(), StorageError> {
        let stored = self.run_mut(run)?.node_mut(run, &node.id)?;
        stored.status = node.status;
        stored.metadata = node.metadata.clone();
        Ok(())
    }

    fn get_status(&self, run: RunId, node: &NodeId) -> Result<NodeStatus, StorageError> {
        self.run(run)?
            .snapshot
            .nodes
            .iter()
            .find(|n| &n.id == node)
            .map(|n| n.status)
            .ok_or_else(|| StorageError::NodeNotFound {
                run: run.0,
                node: node.to_string(),
            })
    }

    fn insert_edge(&mut self, run: RunId, edge: &Edge) -> Result<(), StorageError> {
        let stored = self.run_mut(run)?;
        for endpoint in [&edge.source, &edge.target] {
            if !stored.snapshot.nodes.iter().any(|n| &n.id == endpoint) {
                return Err(StorageError::NodeNotFound {
                    run: run.0,
                    node: endpoint.to_string(),
                });
            }
        }
        let key = edge.key();
        if stored.snapshot.edges.iter().any(|e| e.key() == key) {
            return Ok(());
        }
        stored.snapshot.edges.push(edge.clone());
        stored.digest = structure_digest(&stored.snapshot).to_hex().to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpgen_core::{GraphStore, NodeKind};

    fn graph() -> GraphStore {
        let mut g = GraphStore::new();
        g.add_node(Node::new("a", NodeKind::Capability, "a")).unwrap();
        g.add_node(Node::new("b", NodeKind::Artifact, "b")).unwrap();
        g.add_edge(Edge::depends_on("a", "b")).unwrap();
        g
    }

    #[test]
    fn test_create_and_list_runs() {
        let mut store = InMemoryStore::new();
        let first = store.create_run("first").unwrap();
        let second = store.create_run("second").unwrap();
        assert_eq!(first, RunId(1));
        assert_eq!(second, RunId(2));

        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].name, "second");
        assert_eq!(runs[0].node_count, 0);
    }

    #[test]
    fn test_default_store_starts_at_one() {
        let mut store = InMemoryStore::default();
        assert_eq!(store.create_run("x").unwrap(), RunId(1));
    }

    #[test]
    fn test_delete_run() {
        let mut store = InMemoryStore::new();
        let id = store.create_run("gone").unwrap();
        store.delete_run(id).unwrap();
        assert!(matches!(
            store.load_snapshot(id),
            Err(StorageError::RunNotFound(_))
        ));
        assert!(store.delete_run(id).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut store = InMemoryStore::new();
        let id = store.create_run("demo").unwrap();
        let g = graph();
        store.save_snapshot(id, &g.snapshot()).unwrap();
        let loaded = store.load_graph(id).unwrap();
        assert_eq!(loaded.snapshot(), g.snapshot());
    }

    #[test]
    fn test_incremental_status_writes() {
        let mut store = InMemoryStore::new();
        let id = store.create_run("demo").unwrap();
        store.save_snapshot(id, &graph().snapshot()).unwrap();

        let a = NodeId::from("a");
        store.update_status(id, &a, NodeStatus::Synthesizing).unwrap();
        assert_eq!(store.get_status(id, &a).unwrap(), NodeStatus::Synthesizing);
        // Status writes do not disturb the digest.
        assert!(store.load_snapshot(id).is_ok());

        let missing = store.update_status(id, &NodeId::from("zz"), NodeStatus::Passed);
        assert!(matches!(missing, Err(StorageError::NodeNotFound { .. })));
    }

    #[test]
    fn test_insert_edge_refreshes_digest() {
        let mut store = InMemoryStore::new();
        let id = store.create_run("demo").unwrap();
        store.save_snapshot(id, &graph().snapshot()).unwrap();
        let before = store.list_runs().unwrap()[0].digest.clone();

        let edge = Edge::new("b", "a", rpgen_core::EdgeKind::DataFlow);
        store.insert_edge(id, &edge).unwrap();
        store.insert_edge(id, &edge).unwrap();
        let after = store.list_runs().unwrap()[0].digest.clone();
        assert_ne!(before, after);
        assert_eq!(store.load_snapshot(id).unwrap().edges.len(), 2);

        let dangling = Edge::depends_on("a", "ghost");
        assert!(store.insert_edge(id, &dangling).is_err());
    }
}

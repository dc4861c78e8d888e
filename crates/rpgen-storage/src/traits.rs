//! The [`CheckpointStore`] trait: the storage contract for build runs.
//!
//! The trait is synchronous; async callers hold it behind a mutex and
//! write one transition at a time.

use rpgen_core::{Edge, GraphSnapshot, GraphStore, Node, NodeId, NodeStatus};

use crate::error::StorageError;
use crate::types::{RunId, RunSummary};

pub trait CheckpointStore {
    // -------------------------------------------------------------------
    // Run-level operations
    // -------------------------------------------------------------------

    /// Creates an empty run and returns its id.
    fn create_run(&mut self, name: &str) -> Result<RunId, StorageError>;

    /// Lists all stored runs in creation order.
    fn list_runs(&self) -> Result<Vec<RunSummary>, StorageError>;

    /// Deletes a run and everything stored for it.
    fn delete_run(&mut self, run: RunId) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Bulk save / load
    // -------------------------------------------------------------------

    /// Overwrites the stored graph of `run` and records its digest.
    fn save_snapshot(&mut self, run: RunId, snapshot: &GraphSnapshot) -> Result<(), StorageError>;

    /// Loads the stored graph of `run`, failing with `IntegrityError` if its
    /// structure no longer matches the recorded digest.
    fn load_snapshot(&self, run: RunId) -> Result<GraphSnapshot, StorageError>;

    // -------------------------------------------------------------------
    // Incremental writes
    // -------------------------------------------------------------------

    fn update_status(
        &mut self,
        run: RunId,
        node: &NodeId,
        status: NodeStatus,
    ) -> Result<(), StorageError>;

    /// Writes a node's status and metadata. Identity fields are not changed.
    fn update_node(&mut self, run: RunId, node: &Node) -> Result<(), StorageError>;

    fn get_status(&self, run: RunId, node: &NodeId) -> Result<NodeStatus, StorageError>;

    /// Appends an edge discovered during a build and refreshes the digest.
    /// Re-inserting an existing edge is a no-op.
    fn insert_edge(&mut self, run: RunId, edge: &Edge) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Convenience
    // -------------------------------------------------------------------

    /// Loads and rebuilds the graph of `run`.
    fn load_graph(&self, run: RunId) -> Result<GraphStore, StorageError> {
        let snapshot = self.load_snapshot(run)?;
        GraphStore::restore(snapshot).map_err(|e| StorageError::ReconstructionError {
            reason: e.to_string(),
        })
    }
}

//! Storage-layer identity for persisted runs.
//!
//! [`RunId`] lives here rather than in rpgen-core because a graph only
//! gains an id when it is persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a stored run. Aligns with SQLite's `INTEGER PRIMARY KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub i64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Summary of a stored run (for listing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub name: String,
    pub node_count: usize,
    /// Hex blake3 structure digest.
    pub digest: String,
}

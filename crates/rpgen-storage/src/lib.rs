//! Checkpoint persistence for planning graphs.
//!
//! A *run* is one stored graph plus its per-node statuses. The
//! [`CheckpointStore`] trait has a two-layer API:
//! - **Bulk** methods (`save_snapshot`, `load_snapshot`) write or read a
//!   whole [`GraphSnapshot`](rpgen_core::GraphSnapshot).
//! - **Incremental** methods (`update_status`, `update_node`,
//!   `insert_edge`) write one row each, so every status transition of a
//!   build can be committed before the next node starts.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: RunId, RunSummary storage-layer types
//! - [`traits`]: CheckpointStore trait definition
//! - [`hash`]: blake3 structure digest verified on load
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: migration setup for the SQLite backend
//! - [`sqlite`]: SqliteStore implementation

pub mod error;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use error::StorageError;
pub use hash::{content_digest, structure_digest};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::CheckpointStore;
pub use types::{RunId, RunSummary};

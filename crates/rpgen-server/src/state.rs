//! Application state shared by all handlers.
//!
//! The checkpoint store sits behind `Arc<tokio::sync::Mutex<>>`: the SQLite
//! backend holds a `rusqlite::Connection`, which is `!Sync`, so it cannot
//! live behind an `RwLock`. Jobs and cancellation handles are `DashMap`s so
//! handlers and build tasks reach them without a global lock.

use std::sync::Arc;

use dashmap::DashMap;

use rpgen_core::SimilaritySearch;
use rpgen_storage::{CheckpointStore, InMemoryStore, SqliteStore};

use crate::collab::{IntegrationCheck, Synthesizer, Verifier};
use crate::config::BuildConfig;
use crate::controller::{CancelHandle, SharedCheckpointStore};
use crate::error::ApiError;
use crate::jobs::{InMemoryJobStore, JobId, JobStore};

/// The collaborators every build started by the server uses.
#[derive(Clone)]
pub struct Collaborators {
    pub synthesizer: Arc<dyn Synthesizer>,
    pub verifier: Arc<dyn Verifier>,
    pub similarity: Option<Arc<dyn SimilaritySearch>>,
    /// Run once after each build whose nodes have settled.
    pub integration: Option<Arc<dyn IntegrationCheck>>,
}

impl Collaborators {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, verifier: Arc<dyn Verifier>) -> Self {
        Collaborators {
            synthesizer,
            verifier,
            similarity: None,
            integration: None,
        }
    }

    pub fn with_integration(mut self, check: Arc<dyn IntegrationCheck>) -> Self {
        self.integration = Some(check);
        self
    }
}

#[derive(Clone)]
pub struct AppState {
    pub checkpoints: SharedCheckpointStore,
    pub jobs: Arc<dyn JobStore>,
    /// Cancellation handles of builds still running.
    pub cancellations: Arc<DashMap<JobId, CancelHandle>>,
    pub collaborators: Collaborators,
    /// Used when a build request carries no config of its own.
    pub config: BuildConfig,
}

impl AppState {
    /// Creates state backed by the SQLite database at `db_path`.
    pub fn new(
        db_path: &str,
        collaborators: Collaborators,
        config: BuildConfig,
    ) -> Result<Self, ApiError> {
        let store = SqliteStore::new(db_path)?;
        Ok(Self::with_store(Box::new(store), collaborators, config))
    }

    /// Creates state with an in-memory checkpoint store (for testing).
    pub fn in_memory(collaborators: Collaborators) -> Self {
        Self::with_store(
            Box::new(InMemoryStore::new()),
            collaborators,
            BuildConfig::default(),
        )
    }

    fn with_store(
        store: Box<dyn CheckpointStore + Send>,
        collaborators: Collaborators,
        config: BuildConfig,
    ) -> Self {
        AppState {
            checkpoints: Arc::new(tokio::sync::Mutex::new(store)),
            jobs: Arc::new(InMemoryJobStore::new()),
            cancellations: Arc::new(DashMap::new()),
            collaborators,
            config,
        }
    }
}

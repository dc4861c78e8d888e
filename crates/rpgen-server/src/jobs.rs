//! Job registry for builds started through the server.
//!
//! [`JobStore`] is the lifecycle contract (create, update, complete,
//! evict) the controller reports into; [`InMemoryJobStore`] backs it with a
//! `DashMap` so handlers and worker tasks can touch it concurrently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use uuid::Uuid;

use rpgen_core::NodeStatus;
use rpgen_storage::RunId;

use crate::report::{GenerationReport, RunOutcome};

/// Unique job identifier (UUID v4 newtype).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Cancelled,
    /// The run stopped on an error before producing a report.
    Failed,
}

impl JobState {
    pub fn is_finished(self) -> bool {
        self != JobState::Running
    }
}

/// Node counts per lifecycle bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobProgress {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub passed: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl JobProgress {
    pub fn new(total: usize) -> Self {
        JobProgress {
            total,
            pending: total,
            ..JobProgress::default()
        }
    }

    fn bucket(&mut self, status: NodeStatus) -> &mut usize {
        match status {
            status if status.is_in_flight() => &mut self.in_flight,
            NodeStatus::Passed => &mut self.passed,
            NodeStatus::Failed => &mut self.failed,
            NodeStatus::Blocked => &mut self.blocked,
            _ => &mut self.pending,
        }
    }

    pub fn apply(&mut self, from: NodeStatus, to: NodeStatus) {
        let from_bucket = self.bucket(from);
        *from_bucket = from_bucket.saturating_sub(1);
        *self.bucket(to) += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub progress: JobProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<GenerationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub sequence: u64,
    #[serde(skip)]
    pub created_at: Instant,
    #[serde(skip)]
    pub updated_at: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {0} is still running")]
    StillRunning(JobId),
}

pub trait JobStore: Send + Sync {
    fn create(&self, name: &str, total: usize) -> JobId;

    fn attach_run(&self, id: JobId, run: RunId);

    /// Moves one node between progress buckets.
    fn record_transition(&self, id: JobId, from: NodeStatus, to: NodeStatus);

    /// Finishes the job with its report. A cancelled report finishes it as
    /// `Cancelled`.
    fn complete(&self, id: JobId, report: GenerationReport);

    fn fail(&self, id: JobId, error: String);

    fn get(&self, id: JobId) -> Option<JobRecord>;

    /// All jobs, oldest first.
    fn list(&self) -> Vec<JobRecord>;

    /// Removes a finished job.
    fn evict(&self, id: JobId) -> Result<JobRecord, JobError>;

    /// Removes finished jobs untouched for longer than `age`. Returns how
    /// many were removed.
    fn sweep_finished(&self, age: Duration) -> usize;
}

pub struct InMemoryJobStore {
    jobs: DashMap<JobId, JobRecord>,
    next_sequence: AtomicU64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        InMemoryJobStore {
            jobs: DashMap::new(),
            next_sequence: AtomicU64::new(0),
        }
    }

    fn update(&self, id: JobId, f: impl FnOnce(&mut JobRecord)) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            f(&mut entry);
            entry.updated_at = Instant::now();
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, name: &str, total: usize) -> JobId {
        let id = JobId::new();
        let now = Instant::now();
        self.jobs.insert(
            id,
            JobRecord {
                id,
                name: name.to_string(),
                state: JobState::Running,
                run_id: None,
                progress: JobProgress::new(total),
                report: None,
                error: None,
                sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    fn attach_run(&self, id: JobId, run: RunId) {
        self.update(id, |job| job.run_id = Some(run));
    }

    fn record_transition(&self, id: JobId, from: NodeStatus, to: NodeStatus) {
        self.update(id, |job| job.progress.apply(from, to));
    }

    fn complete(&self, id: JobId, report: GenerationReport) {
        self.update(id, |job| {
            job.state = if report.outcome == RunOutcome::Cancelled {
                JobState::Cancelled
            } else {
                JobState::Completed
            };
            job.report = Some(report);
        });
    }

    fn fail(&self, id: JobId, error: String) {
        self.update(id, |job| {
            job.state = JobState::Failed;
            job.error = Some(error);
        });
    }

    fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.get(&id).map(|entry| entry.clone())
    }

    fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs
    }

    fn evict(&self, id: JobId) -> Result<JobRecord, JobError> {
        let state = self
            .jobs
            .get(&id)
            .map(|entry| entry.state)
            .ok_or(JobError::NotFound(id))?;
        if !state.is_finished() {
            return Err(JobError::StillRunning(id));
        }
        self.jobs
            .remove(&id)
            .map(|(_, job)| job)
            .ok_or(JobError::NotFound(id))
    }

    fn sweep_finished(&self, age: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.jobs.retain(|_, job| {
            let keep = !job.state.is_finished() || now.duration_since(job.updated_at) < age;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

/// Sweeps `store` every `every`, removing finished jobs idle for longer
/// than `age`. The task runs until aborted.
pub fn spawn_sweeper(store: Arc<dyn JobStore>, every: Duration, age: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(every);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            let removed = store.sweep_finished(age);
            if removed > 0 {
                debug!(removed, "swept finished jobs");
            }
        }
    })
}

//! Generation controller and HTTP surface for rpgen planning graphs.
//!
//! [`controller::GenerationController`] turns a buildable graph into
//! generated content by driving each node through synthesis, verification
//! and repair, using the collaborator traits in [`collab`]. The remaining
//! modules wrap it: a job registry, a progress stream, production
//! adapters, and a thin axum API.

pub mod adapters;
pub mod collab;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod handlers;
pub mod jobs;
pub mod report;
pub mod router;
pub mod schema;
pub mod state;

pub use collab::{
    Candidate, IntegrationCheck, NodeBrief, RepairContext, SynthesisError, Synthesizer, TestAuthor,
    Verdict, Verifier,
};
pub use config::{BuildConfig, TimeoutClass, VerdictPolicy};
pub use controller::{build, BuildOutcome, CancelHandle, GenerationController, SharedCheckpointStore};
pub use error::{ApiError, BuildError};
pub use events::{ProgressChannel, ProgressEvent};
pub use jobs::{InMemoryJobStore, JobId, JobRecord, JobState, JobStore};
pub use report::{
    FailureCause, GenerationReport, IntegrationReport, IntegrationStatus, NodeReport, RunOutcome,
};

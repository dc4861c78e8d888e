//! Build job request/response types.

use serde::{Deserialize, Serialize};

use rpgen_core::GraphSnapshot;
use rpgen_storage::RunId;

use crate::config::BuildConfig;
use crate::jobs::{JobId, JobRecord};

/// Request to start a build.
#[derive(Debug, Clone, Deserialize)]
pub struct StartBuildRequest {
    /// Label for the job and the checkpoint run.
    #[serde(default)]
    pub name: Option<String>,
    pub graph: GraphSnapshot,
    /// Overrides the server's build configuration.
    #[serde(default)]
    pub config: Option<BuildConfig>,
}

/// Response from starting a build.
#[derive(Debug, Clone, Serialize)]
pub struct StartBuildResponse {
    pub job_id: JobId,
    pub run_id: RunId,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildListResponse {
    pub builds: Vec<JobRecord>,
}

//! Build job handlers: start, list, inspect, cancel, evict.

use axum::extract::{Path, State};
use axum::Json;
use tracing::{info, warn};
use uuid::Uuid;

use rpgen_core::{GraphStore, Validator};

use crate::controller::GenerationController;
use crate::error::ApiError;
use crate::jobs::{JobId, JobRecord};
use crate::schema::builds::{BuildListResponse, StartBuildRequest, StartBuildResponse};
use crate::state::AppState;

/// Starts a build in the background.
///
/// `POST /builds`
///
/// The graph is validated and checkpointed before the response is sent;
/// progress is then visible through `GET /builds/{id}`.
pub async fn start_build(
    State(state): State<AppState>,
    Json(req): Json<StartBuildRequest>,
) -> Result<Json<StartBuildResponse>, ApiError> {
    let violations = Validator::validate_snapshot(&req.graph);
    if !violations.is_empty() {
        return Err(ApiError::ValidationFailed(violations));
    }
    let config = req.config.unwrap_or_else(|| state.config.clone());
    config.validate()?;
    let graph = GraphStore::restore(req.graph)?;
    Validator::ensure_buildable(&graph)?;
    let name = req.name.unwrap_or_else(|| "build".to_string());

    let run = {
        let mut store = state.checkpoints.lock().await;
        let run = store.create_run(&name)?;
        store.save_snapshot(run, &graph.snapshot())?;
        run
    };
    let job = state.jobs.create(&name, graph.node_count());
    state.jobs.attach_run(job, run);

    let collaborators = &state.collaborators;
    let mut controller = GenerationController::new(
        collaborators.synthesizer.clone(),
        collaborators.verifier.clone(),
        config,
    )
    .with_job(state.jobs.clone(), job)
    .with_checkpoints(state.checkpoints.clone(), run);
    if let Some(similarity) = &collaborators.similarity {
        controller = controller.with_similarity(similarity.clone());
    }
    if let Some(check) = &collaborators.integration {
        controller = controller.with_integration(check.clone());
    }
    state.cancellations.insert(job, controller.cancel_handle());

    let cancellations = state.cancellations.clone();
    tokio::spawn(async move {
        match controller.build(graph).await {
            Ok(outcome) => info!(job = %job, outcome = ?outcome.report.outcome, "build job finished"),
            Err(err) => warn!(job = %job, error = %err, "build job failed"),
        }
        cancellations.remove(&job);
    });

    info!(job = %job, run = %run, "build job started");
    Ok(Json(StartBuildResponse {
        job_id: job,
        run_id: run,
    }))
}

/// Lists all build jobs, oldest first.
///
/// `GET /builds`
pub async fn list_builds(State(state): State<AppState>) -> Json<BuildListResponse> {
    Json(BuildListResponse {
        builds: state.jobs.list(),
    })
}

/// `GET /builds/{id}`
pub async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobRecord>, ApiError> {
    let id = JobId(id);
    state
        .jobs
        .get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("build {id}")))
}

/// Cancels a running build.
///
/// `POST /builds/{id}/cancel`
pub async fn cancel_build(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = JobId(id);
    if let Some(handle) = state.cancellations.get(&id) {
        handle.cancel();
        info!(job = %id, "build cancellation requested");
        return Ok(Json(serde_json::json!({ "success": true, "job_id": id })));
    }
    match state.jobs.get(id) {
        Some(_) => Err(ApiError::Conflict(format!("build {id} has already finished"))),
        None => Err(ApiError::NotFound(format!("build {id}"))),
    }
}

/// Evicts a finished build from the registry.
///
/// `DELETE /builds/{id}`
pub async fn delete_build(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = JobId(id);
    state.jobs.evict(id)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

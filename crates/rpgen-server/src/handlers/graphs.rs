//! Stateless graph inspection handlers.

use axum::Json;

use rpgen_core::{
    GraphSnapshot, GraphStore, LocalizationEngine, Scheduler, TermIndex, Validator,
};

use crate::error::ApiError;
use crate::schema::graphs::{OrderResponse, RelatedRequest, RelatedResponse, ValidateResponse};

/// Restores a snapshot after checking it, so integrity defects come back
/// as a violation list instead of the first error.
fn restore_checked(snapshot: GraphSnapshot) -> Result<GraphStore, ApiError> {
    let violations = Validator::validate_snapshot(&snapshot);
    if !violations.is_empty() {
        return Err(ApiError::ValidationFailed(violations));
    }
    Ok(GraphStore::restore(snapshot)?)
}

/// Validates a graph document.
///
/// `POST /graphs/validate`
pub async fn validate_graph(
    Json(snapshot): Json<GraphSnapshot>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let violations = Validator::validate_snapshot(&snapshot);
    if !violations.is_empty() {
        return Ok(Json(ValidateResponse {
            buildable: false,
            violations,
            advisories: Vec::new(),
            metrics: None,
        }));
    }
    let graph = GraphStore::restore(snapshot)?;
    Ok(Json(ValidateResponse {
        buildable: true,
        violations,
        advisories: Validator::lint(&graph),
        metrics: Some(graph.metrics()),
    }))
}

/// Returns the processing order of a graph document.
///
/// `POST /graphs/order`
pub async fn order_graph(
    Json(snapshot): Json<GraphSnapshot>,
) -> Result<Json<OrderResponse>, ApiError> {
    let graph = restore_checked(snapshot)?;
    let order = Scheduler::order(&graph)?;
    Ok(Json(OrderResponse { order }))
}

/// Finds nodes related to a free-text query.
///
/// `POST /graphs/related`
pub async fn related_nodes(
    Json(req): Json<RelatedRequest>,
) -> Result<Json<RelatedResponse>, ApiError> {
    let graph = restore_checked(req.graph)?;
    let schedule = Scheduler::plan(&graph)?;
    let index = TermIndex::build(&graph);
    let engine = LocalizationEngine::new(&graph)
        .with_schedule(&schedule)
        .with_similarity(&index)
        .with_radius(req.radius.unwrap_or(LocalizationEngine::DEFAULT_RADIUS));
    let related = engine.find_related(&req.query, req.anchor.as_deref(), req.limit)?;
    Ok(Json(RelatedResponse { related }))
}

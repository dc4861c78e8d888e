//! Router assembly for the rpgen HTTP API.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the complete axum router with all API routes.
///
/// Routes use axum 0.8 `/{param}` path syntax. TraceLayer provides
/// request-level logging via tracing.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Stateless graph inspection
        .route("/graphs/validate", post(handlers::graphs::validate_graph))
        .route("/graphs/order", post(handlers::graphs::order_graph))
        .route("/graphs/related", post(handlers::graphs::related_nodes))
        // Build jobs
        .route(
            "/builds",
            get(handlers::builds::list_builds).post(handlers::builds::start_build),
        )
        .route(
            "/builds/{id}",
            get(handlers::builds::get_build).delete(handlers::builds::delete_build),
        )
        .route("/builds/{id}/cancel", post(handlers::builds::cancel_build))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

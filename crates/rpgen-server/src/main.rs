//! Binary entrypoint for the rpgen HTTP server.
//!
//! Reads configuration from environment variables:
//! - `RPGEN_DB_PATH`: SQLite checkpoint database (default: "rpgen.db")
//! - `RPGEN_PORT`: listen port (default: "3000")
//! - `RPGEN_WORKSPACE`: directory candidates are written into (default: ".")
//! - `RPGEN_TEST_COMMAND`: verifier command run in the workspace (required)
//! - `RPGEN_GENERATE_TESTS`: "1" or "true" to have the LLM write a unit
//!   test per node, exported to the command as `RPGEN_TEST_PATH`
//! - `RPGEN_INTEGRATION_COMMAND`: command run once after each build
//! - `RPGEN_JOB_TTL_SECS`: how long finished jobs are kept (default: 3600)
//! - `RPGEN_LLM_*`: synthesizer provider, see [`LlmConfig::from_env`]
//! - `RPGEN_MAX_RETRIES` and friends: see [`BuildConfig::from_env`]

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use rpgen_server::adapters::{
    CommandVerifier, GeneratedTestVerifier, IntegrationCommand, LlmConfig, LlmSynthesizer,
};
use rpgen_server::collab::Verifier;
use rpgen_server::config::BuildConfig;
use rpgen_server::jobs::spawn_sweeper;
use rpgen_server::router::build_router;
use rpgen_server::state::{AppState, Collaborators};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
    let db_path = var("RPGEN_DB_PATH").unwrap_or_else(|| "rpgen.db".to_string());
    let port = var("RPGEN_PORT").unwrap_or_else(|| "3000".to_string());
    let workspace = var("RPGEN_WORKSPACE").unwrap_or_else(|| ".".to_string());
    let test_command = var("RPGEN_TEST_COMMAND")
        .ok_or("RPGEN_TEST_COMMAND must name the command that verifies a candidate")?;
    let generate_tests = matches!(var("RPGEN_GENERATE_TESTS").as_deref(), Some("1" | "true"));
    let job_ttl = match var("RPGEN_JOB_TTL_SECS") {
        Some(secs) => Duration::from_secs(
            secs.parse()
                .map_err(|err| format!("RPGEN_JOB_TTL_SECS: {err}"))?,
        ),
        None => Duration::from_secs(3600),
    };

    let llm = Arc::new(LlmSynthesizer::new(LlmConfig::from_env()));
    let runner = CommandVerifier::new(&workspace, test_command);
    let verifier: Arc<dyn Verifier> = if generate_tests {
        Arc::new(GeneratedTestVerifier::new(llm.clone(), runner))
    } else {
        Arc::new(runner)
    };
    let mut collaborators = Collaborators::new(llm, verifier);
    if let Some(command) = var("RPGEN_INTEGRATION_COMMAND") {
        collaborators = collaborators.with_integration(Arc::new(IntegrationCommand::new(&workspace, command)));
    }

    let state = AppState::new(&db_path, collaborators, BuildConfig::from_env()?)?;
    spawn_sweeper(state.jobs.clone(), SWEEP_INTERVAL, job_ttl);
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(generate_tests, job_ttl_secs = job_ttl.as_secs(), "rpgen server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

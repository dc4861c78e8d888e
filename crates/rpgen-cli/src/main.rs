//! rpgen planning-graph CLI.
//!
//! Provides the `rpgen` binary with subcommands for inspecting a graph
//! document (`validate`, `order`, `related`), generating it (`build`) and
//! reading back a checkpointed run (`status`).
//!
//! `build` drives the same `GenerationController` the HTTP server uses,
//! with the LLM synthesizer and the command verifier as collaborators.
//!
//! Exit codes: 0 = success, 1 = build finished incomplete or failed,
//! 2 = graph not buildable, 3 = I/O or storage error.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rpgen_core::{GraphSnapshot, GraphStore, LocalizationEngine, Scheduler, TermIndex, Validator};
use rpgen_server::adapters::{
    CommandVerifier, GeneratedTestVerifier, IntegrationCommand, LlmConfig, LlmSynthesizer,
};
use rpgen_server::{
    BuildConfig, BuildError, GenerationController, ProgressEvent, SharedCheckpointStore, Verifier,
};
use rpgen_storage::{CheckpointStore, RunId, SqliteStore};

/// Plan-graph driven code generation.
#[derive(Parser)]
#[command(name = "rpgen", about = "Plan-graph driven code generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a graph document for structural violations and lint findings.
    Validate {
        /// Path to the graph document (JSON).
        graph: PathBuf,
    },

    /// Print the processing order of a graph document.
    Order {
        graph: PathBuf,
    },

    /// Find nodes related to a query, optionally around an anchor node.
    Related {
        graph: PathBuf,

        /// Free-text query matched against names, docs, signatures and tags.
        query: String,

        /// Node whose structural neighborhood is always included.
        #[arg(short, long)]
        anchor: Option<String>,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Generate every node of a graph document.
    Build {
        /// Path to the graph document. Not needed with --resume.
        #[arg(required_unless_present = "resume")]
        graph: Option<PathBuf>,

        /// Directory candidates are written into.
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Shell command that verifies a candidate; exit 0 means pass.
        #[arg(short, long)]
        test_command: String,

        /// Have the LLM write a unit test per node; the command finds it
        /// in $RPGEN_TEST_PATH.
        #[arg(long)]
        generate_tests: bool,

        /// Command run once in the workspace after every node settles.
        #[arg(long)]
        integration_command: Option<String>,

        /// SQLite database recording the run for status and resume.
        #[arg(short, long)]
        checkpoint: Option<String>,

        /// Resume a checkpointed run instead of starting a new one.
        #[arg(long, requires = "checkpoint")]
        resume: Option<i64>,

        /// Run name stored with the checkpoint.
        #[arg(long, default_value = "build")]
        name: String,

        #[arg(long)]
        max_retries: Option<u32>,

        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Print progress events to stderr as JSON lines.
        #[arg(long)]
        progress: bool,
    },

    /// Show node statuses of a checkpointed run, or list runs.
    Status {
        #[arg(short, long)]
        checkpoint: String,

        /// Run to show. Lists all runs when omitted.
        #[arg(short, long)]
        run: Option<i64>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Validate { graph } => run_validate(&graph),
        Commands::Order { graph } => run_order(&graph),
        Commands::Related {
            graph,
            query,
            anchor,
            limit,
        } => run_related(&graph, &query, anchor.as_deref(), limit),
        Commands::Build {
            graph,
            workspace,
            test_command,
            generate_tests,
            integration_command,
            checkpoint,
            resume,
            name,
            max_retries,
            max_concurrency,
            progress,
        } => {
            let mut config = match BuildConfig::from_env() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            };
            if let Some(n) = max_retries {
                config.max_retries = n;
            }
            if let Some(n) = max_concurrency {
                config.max_concurrency = n;
            }
            let Some(source) = build_source(graph, resume.map(RunId)) else {
                eprintln!("Error: build needs a graph document or --resume");
                process::exit(2);
            };
            let options = BuildOptions {
                source,
                workspace,
                test_command,
                generate_tests,
                integration_command,
                checkpoint,
                name,
                progress,
            };
            run_build(options, config)
        }
        Commands::Status { checkpoint, run } => run_status(&checkpoint, run.map(RunId)),
    };
    process::exit(exit_code);
}

/// Reads a graph document, printing the failure and returning exit code 3.
fn read_snapshot(path: &Path) -> Result<GraphSnapshot, i32> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: failed to read '{}': {}", path.display(), e);
        3
    })?;
    GraphSnapshot::from_json(&text).map_err(|e| {
        eprintln!("Error: '{}' is not a graph document: {}", path.display(), e);
        3
    })
}

/// Reads and restores a graph, reporting every violation with exit code 2.
fn read_graph(path: &Path) -> Result<GraphStore, i32> {
    let snapshot = read_snapshot(path)?;
    let violations = Validator::validate_snapshot(&snapshot);
    if !violations.is_empty() {
        eprintln!("Graph is not buildable, {} violation(s):", violations.len());
        for v in &violations {
            eprintln!("  - {}", v);
        }
        return Err(2);
    }
    GraphStore::restore(snapshot).map_err(|e| {
        eprintln!("Error: {}", e);
        2
    })
}

fn print_json(value: &serde_json::Value) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e));
    println!("{}", json);
}

fn run_validate(path: &Path) -> i32 {
    let snapshot = match read_snapshot(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let violations = Validator::validate_snapshot(&snapshot);
    if !violations.is_empty() {
        print_json(&serde_json::json!({
            "buildable": false,
            "violations": violations,
        }));
        return 2;
    }
    let graph = match GraphStore::restore(snapshot) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };
    print_json(&serde_json::json!({
        "buildable": true,
        "violations": [],
        "advisories": Validator::lint(&graph),
        "metrics": graph.metrics(),
    }));
    0
}

fn run_order(path: &Path) -> i32 {
    let graph = match read_graph(path) {
        Ok(g) => g,
        Err(code) => return code,
    };
    match Scheduler::order(&graph) {
        Ok(order) => {
            for id in order {
                println!("{}", id);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    }
}

fn run_related(path: &Path, query: &str, anchor: Option<&str>, limit: usize) -> i32 {
    let graph = match read_graph(path) {
        Ok(g) => g,
        Err(code) => return code,
    };
    let index = TermIndex::build(&graph);
    let engine = LocalizationEngine::new(&graph).with_similarity(&index);
    match engine.find_related(query, anchor, limit) {
        Ok(related) => {
            print_json(&serde_json::json!({ "related": related }));
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// What a build starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BuildSource {
    Graph(PathBuf),
    Resume(RunId),
}

/// Resolves the build arguments. `--resume` wins over a graph document.
fn build_source(graph: Option<PathBuf>, resume: Option<RunId>) -> Option<BuildSource> {
    match (graph, resume) {
        (Some(path), Some(run)) => {
            warn!(graph = %path.display(), %run, "resuming from checkpoint, ignoring the graph document");
            Some(BuildSource::Resume(run))
        }
        (None, Some(run)) => Some(BuildSource::Resume(run)),
        (Some(path), None) => Some(BuildSource::Graph(path)),
        (None, None) => None,
    }
}

/// A build ready to start: a validated graph, or a run to reload.
enum BuildPlan {
    Fresh(GraphStore),
    Resume(RunId),
}

struct BuildOptions {
    source: BuildSource,
    workspace: PathBuf,
    test_command: String,
    generate_tests: bool,
    integration_command: Option<String>,
    checkpoint: Option<String>,
    name: String,
    progress: bool,
}

/// Execute the build subcommand.
///
/// Prints the `GenerationReport` as JSON to stdout. Returns 0 only when
/// every node passed.
fn run_build(options: BuildOptions, config: BuildConfig) -> i32 {
    let plan = match &options.source {
        BuildSource::Graph(path) => match read_graph(path) {
            Ok(g) => BuildPlan::Fresh(g),
            Err(code) => return code,
        },
        BuildSource::Resume(run) => BuildPlan::Resume(*run),
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return 3;
        }
    };
    runtime.block_on(async move {
        let synthesizer = Arc::new(LlmSynthesizer::new(LlmConfig::from_env()));
        let runner = CommandVerifier::new(&options.workspace, &options.test_command);
        let verifier: Arc<dyn Verifier> = if options.generate_tests {
            Arc::new(GeneratedTestVerifier::new(synthesizer.clone(), runner))
        } else {
            Arc::new(runner)
        };
        let mut controller = GenerationController::new(synthesizer, verifier, config);
        if let Some(command) = &options.integration_command {
            controller = controller.with_integration(Arc::new(IntegrationCommand::new(
                &options.workspace,
                command,
            )));
        }

        if let Some(db_path) = &options.checkpoint {
            let (store, run) = match open_checkpoint(db_path, &options.name, &plan) {
                Ok(opened) => opened,
                Err(e) => {
                    eprintln!("Error: checkpoint '{}': {}", db_path, e);
                    return 3;
                }
            };
            info!(%run, db = %db_path, "checkpointing build");
            controller = controller.with_checkpoints(store, run);
        }

        let printer = options.progress.then(|| tokio::spawn(print_progress(controller.subscribe())));
        let cancel = controller.cancel_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling build");
                cancel.cancel();
            }
        });

        let result = match plan {
            BuildPlan::Fresh(graph) => controller.build(graph).await,
            BuildPlan::Resume(_) => controller.resume().await,
        };
        drop(controller);
        if let Some(printer) = printer {
            let _ = printer.await;
        }

        match result {
            Ok(outcome) => {
                let report = &outcome.report;
                print_json(&serde_json::to_value(report).unwrap_or_default());
                eprintln!(
                    "{} passed, {} failed, {} blocked ({:.0}% pass rate)",
                    report.passed,
                    report.failed,
                    report.blocked,
                    report.pass_rate * 100.0
                );
                if report.is_complete() {
                    0
                } else {
                    1
                }
            }
            Err(BuildError::Core(e)) => {
                eprintln!("Graph is not buildable: {}", e);
                2
            }
            Err(BuildError::Storage(e)) => {
                eprintln!("Storage error: {}", e);
                3
            }
            Err(e) => {
                eprintln!("Build error: {}", e);
                1
            }
        }
    })
}

/// Opens the checkpoint database. A fresh build gets a new run seeded with
/// its graph; a resumed build reuses its run.
fn open_checkpoint(
    db_path: &str,
    name: &str,
    plan: &BuildPlan,
) -> Result<(SharedCheckpointStore, RunId), rpgen_storage::StorageError> {
    let mut store = SqliteStore::new(db_path)?;
    let run = match plan {
        BuildPlan::Resume(run) => *run,
        BuildPlan::Fresh(graph) => {
            let run = store.create_run(name)?;
            store.save_snapshot(run, &graph.snapshot())?;
            run
        }
    };
    let boxed: Box<dyn CheckpointStore + Send> = Box::new(store);
    Ok((Arc::new(Mutex::new(boxed)), run))
}

async fn print_progress(mut events: broadcast::Receiver<ProgressEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{}", line);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                eprintln!("{{\"event\": \"lagged\", \"skipped\": {}}}", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Execute the status subcommand.
fn run_status(db_path: &str, run: Option<RunId>) -> i32 {
    let store = match SqliteStore::new(db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to open database '{}': {}", db_path, e);
            return 3;
        }
    };

    let Some(run) = run else {
        return match store.list_runs() {
            Ok(runs) => {
                print_json(&serde_json::json!({ "runs": runs }));
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                3
            }
        };
    };

    let graph = match store.load_graph(run) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: failed to load run {}: {}", run, e);
            return 3;
        }
    };
    let nodes: Vec<serde_json::Value> = graph
        .nodes()
        .map(|node| {
            serde_json::json!({
                "id": node.id,
                "kind": node.kind,
                "status": node.status,
                "attempts": node.metadata.output.as_ref().map(|o| o.attempts),
            })
        })
        .collect();
    print_json(&serde_json::json!({
        "run": run,
        "metrics": graph.metrics(),
        "nodes": nodes,
    }));
    0
}

#[cfg(test)]
mod tests {
    use rpgen_core::{Node, NodeKind};

    use super::*;

    #[test]
    fn build_needs_a_graph_or_a_run() {
        let bare = Cli::try_parse_from(["rpgen", "build", "-t", "true", "--checkpoint", "runs.db"]);
        assert!(bare.is_err());
        let unbound = Cli::try_parse_from(["rpgen", "build", "-t", "true", "--resume", "4"]);
        assert!(unbound.is_err());

        let cli = Cli::try_parse_from(["rpgen", "build", "-t", "true", "-c", "runs.db", "--resume", "4"])
            .unwrap();
        let Commands::Build { graph, resume, .. } = cli.command else {
            panic!("expected the build subcommand");
        };
        assert_eq!(build_source(graph, resume.map(RunId)), Some(BuildSource::Resume(RunId(4))));
    }

    #[test]
    fn resume_wins_over_a_graph_document() {
        assert_eq!(
            build_source(Some("plan.json".into()), Some(RunId(2))),
            Some(BuildSource::Resume(RunId(2)))
        );
        assert_eq!(
            build_source(Some("plan.json".into()), None),
            Some(BuildSource::Graph("plan.json".into()))
        );
        assert_eq!(build_source(None, None), None);
    }

    #[test]
    fn fresh_build_seeds_a_run_and_resume_reuses_it() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("runs.db");
        let db = db.to_str().unwrap();
        let mut graph = GraphStore::new();
        graph.add_node(Node::new("a", NodeKind::Capability, "auth")).unwrap();

        let (_, run) = open_checkpoint(db, "first", &BuildPlan::Fresh(graph)).unwrap();
        let (_, resumed) = open_checkpoint(db, "second", &BuildPlan::Resume(run)).unwrap();
        assert_eq!(resumed, run);

        let store = SqliteStore::new(db).unwrap();
        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert!(store.load_graph(run).unwrap().get_node("a").is_ok());
    }
}

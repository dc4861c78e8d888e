//! The generation controller.
//!
//! [`GenerationController::build`] drives every node of a buildable graph
//! through its lifecycle:
//!
//! ```text
//! PENDING -> SYNTHESIZING -> VALIDATING -> PASSED
//!                 ^              |
//!                 |              v
//!                 +-------- REPAIRING        (-> FAILED when retries run out)
//! ```
//!
//! A node is dispatched once every ordering predecessor is terminal. If a
//! `depends_on` predecessor ended FAILED or BLOCKED, the node goes straight
//! to BLOCKED without touching the collaborators. Up to `max_concurrency`
//! nodes are in flight at once, each on its own task in a `JoinSet`.
//!
//! All graph mutations go through one `RwLock` write guard. A transition
//! is applied to the graph, written to the checkpoint store, counted in the
//! job record and published on the progress channel while that guard is
//! held, so subscribers and checkpoints observe transitions in commit
//! order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use rpgen_core::{
    Direction, Edge, EdgeKind, GeneratedOutput, GraphStore, LocalizationEngine, NodeId,
    NodeStatus, RelatedNode, Relevance, Schedule, Scheduler, SimilaritySearch, Validator,
};
use rpgen_storage::{content_digest, CheckpointStore, RunId};

use crate::collab::{
    Candidate, ContextEntry, IntegrationCheck, NodeBrief, RepairContext, SynthesisError,
    Synthesizer, Verdict, Verifier,
};
use crate::config::{BuildConfig, TimeoutClass, VerdictPolicy};
use crate::error::BuildError;
use crate::events::{ProgressChannel, ProgressEvent};
use crate::jobs::{JobId, JobStore};
use crate::report::{FailureCause, GenerationReport, IntegrationReport, NodeReport};

/// A checkpoint store shared between the controller and its callers.
pub type SharedCheckpointStore = Arc<Mutex<Box<dyn CheckpointStore + Send>>>;

/// Requests cancellation of a running build.
///
/// Cancelling aborts in-flight nodes, marks every non-terminal node
/// BLOCKED and persists the partial graph. PASSED nodes stay PASSED.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        CancelHandle {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// The report plus the graph as it stood when the build ended.
#[derive(Debug)]
pub struct BuildOutcome {
    pub report: GenerationReport,
    pub graph: GraphStore,
}

#[derive(Clone)]
struct JobBinding {
    store: Arc<dyn JobStore>,
    id: JobId,
}

#[derive(Clone)]
struct CheckpointBinding {
    store: SharedCheckpointStore,
    run: RunId,
}

pub struct GenerationController {
    synthesizer: Arc<dyn Synthesizer>,
    verifier: Arc<dyn Verifier>,
    similarity: Option<Arc<dyn SimilaritySearch>>,
    integration: Option<Arc<dyn IntegrationCheck>>,
    config: BuildConfig,
    progress: ProgressChannel,
    cancel: CancelHandle,
    job: Option<JobBinding>,
    checkpoint: Option<CheckpointBinding>,
}

impl GenerationController {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        verifier: Arc<dyn Verifier>,
        config: BuildConfig,
    ) -> Self {
        GenerationController {
            synthesizer,
            verifier,
            similarity: None,
            integration: None,
            config,
            progress: ProgressChannel::default(),
            cancel: CancelHandle::new(),
            job: None,
            checkpoint: None,
        }
    }

    /// Ranks related nodes for repair contexts beyond keyword matching.
    pub fn with_similarity(mut self, similarity: Arc<dyn SimilaritySearch>) -> Self {
        self.similarity = Some(similarity);
        self
    }

    /// Runs `check` over the workspace once every node has settled; its
    /// result lands in [`GenerationReport::integration`].
    pub fn with_integration(mut self, check: Arc<dyn IntegrationCheck>) -> Self {
        self.integration = Some(check);
        self
    }

    /// Reports progress and the final report into `store` under `id`.
    pub fn with_job(mut self, store: Arc<dyn JobStore>, id: JobId) -> Self {
        self.job = Some(JobBinding { store, id });
        self
    }

    /// Persists every transition into `run` of `store`.
    pub fn with_checkpoints(mut self, store: SharedCheckpointStore, run: RunId) -> Self {
        self.checkpoint = Some(CheckpointBinding { store, run });
        self
    }

    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Builds every node of `graph`.
    ///
    /// Nodes that are already PASSED are kept; every other node is reset
    /// to PENDING first, so a restored checkpoint resumes where it stopped.
    /// Fails without starting if the graph has validator violations.
    pub async fn build(&self, graph: GraphStore) -> Result<BuildOutcome, BuildError> {
        let result = self.run(graph).await;
        if let (Err(err), Some(job)) = (&result, &self.job) {
            job.store.fail(job.id, err.to_string());
        }
        result
    }

    /// Reloads the attached checkpoint run and builds it.
    pub async fn resume(&self) -> Result<BuildOutcome, BuildError> {
        let checkpoint = self
            .checkpoint
            .as_ref()
            .ok_or_else(|| BuildError::Config("no checkpoint store attached".into()))?;
        let graph = checkpoint.store.lock().await.load_graph(checkpoint.run)?;
        info!(run = %checkpoint.run, "resuming from checkpoint");
        self.build(graph).await
    }

    async fn run(&self, mut graph: GraphStore) -> Result<BuildOutcome, BuildError> {
        self.config.validate()?;
        Validator::ensure_buildable(&graph)?;
        let reset = graph.reset_unfinished();
        let mut schedule = Scheduler::plan(&graph)?;

        let mut ledger = HashMap::new();
        for node in graph.nodes().filter(|n| n.status == NodeStatus::Passed) {
            schedule.mark_processed(&node.id);
            let attempts = node.metadata.output.as_ref().map_or(0, |o| o.attempts);
            ledger.insert(
                node.id.clone(),
                NodeLedger {
                    attempts,
                    ..NodeLedger::default()
                },
            );
            if let Some(job) = &self.job {
                job.store
                    .record_transition(job.id, NodeStatus::Pending, NodeStatus::Passed);
            }
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            already_passed = ledger.len(),
            reset = reset.len(),
            "build started"
        );
        self.progress.publish(ProgressEvent::RunStarted {
            total: graph.node_count(),
            order: schedule.order().to_vec(),
        });

        let worker = Worker {
            synthesizer: self.synthesizer.clone(),
            verifier: self.verifier.clone(),
            similarity: self.similarity.clone(),
            config: self.config.clone(),
            progress: self.progress.clone(),
            job: self.job.clone(),
            checkpoint: self.checkpoint.clone(),
            state: Arc::new(RunState {
                graph: RwLock::new(graph),
                schedule: Mutex::new(schedule),
                ledger: Mutex::new(ledger),
            }),
        };
        worker.checkpoint_snapshot().await?;

        let cancelled = match worker.drive(self.cancel.subscribe()).await {
            Ok(cancelled) => cancelled,
            Err(err) => {
                warn!(error = %err, "build aborted");
                let reason = err.to_string();
                if let Err(cleanup) = worker.block_unfinished(FailureCause::Aborted { reason }).await {
                    warn!(error = %cleanup, "could not block unfinished nodes");
                }
                if let Err(cleanup) = worker.checkpoint_snapshot().await {
                    warn!(error = %cleanup, "could not persist aborted graph");
                }
                return Err(err);
            }
        };
        if cancelled {
            info!("build cancelled");
            worker.block_unfinished(FailureCause::Cancelled).await?;
        }
        worker.checkpoint_snapshot().await?;

        let (mut report, graph) = worker.finish(cancelled).await;
        if let Some(check) = &self.integration {
            report.integration = Some(self.integrate(check.as_ref(), &report, cancelled).await);
        }
        info!(
            passed = report.passed,
            failed = report.failed,
            blocked = report.blocked,
            pass_rate = report.pass_rate,
            outcome = ?report.outcome,
            "build finished"
        );
        self.progress.publish(ProgressEvent::RunFinished {
            outcome: report.outcome,
            pass_rate: report.pass_rate,
        });
        if let Some(job) = &self.job {
            job.store.complete(job.id, report.clone());
        }
        Ok(BuildOutcome { report, graph })
    }

    async fn integrate(
        &self,
        check: &dyn IntegrationCheck,
        report: &GenerationReport,
        cancelled: bool,
    ) -> IntegrationReport {
        if cancelled {
            return IntegrationReport::skipped("build cancelled");
        }
        if report.passed == 0 {
            return IntegrationReport::skipped("no node passed");
        }
        let limit = self.config.verification_timeout();
        let result = match timeout(limit, check.check()).await {
            Ok(verdict) => IntegrationReport::from(verdict),
            Err(_) => IntegrationReport::error(format!(
                "integration check timed out after {}s",
                limit.as_secs()
            )),
        };
        info!(status = ?result.status, "integration check finished");
        result
    }
}

/// Builds `graph` with a one-off controller and returns its report.
pub async fn build(
    graph: GraphStore,
    config: BuildConfig,
    synthesizer: Arc<dyn Synthesizer>,
    verifier: Arc<dyn Verifier>,
) -> Result<GenerationReport, BuildError> {
    let controller = GenerationController::new(synthesizer, verifier, config);
    Ok(controller.build(graph).await?.report)
}

// ---------------------------------------------------------------------------
// Run internals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct NodeLedger {
    attempts: u32,
    environment_retries: u32,
    failure: Option<FailureCause>,
}

/// Shared mutable state of one run. Lock order: graph, then schedule,
/// then the checkpoint store.
struct RunState {
    graph: RwLock<GraphStore>,
    schedule: Mutex<Schedule>,
    ledger: Mutex<HashMap<NodeId, NodeLedger>>,
}

enum Readiness {
    Waiting,
    Ready,
    Blocked(NodeId),
}

/// Result of one synthesize+verify round.
enum Round {
    Pass(Candidate),
    Behavioral {
        diagnostic: String,
        candidate: Option<String>,
    },
    EnvironmentExhausted(String),
}

enum Failure {
    Behavioral(String),
    Environment(String),
}

impl Failure {
    fn timeout(policy: VerdictPolicy, message: String) -> Self {
        match policy.timeout {
            TimeoutClass::Behavioral => Failure::Behavioral(message),
            TimeoutClass::Environment => Failure::Environment(message),
        }
    }
}

enum DriveEvent {
    Joined(Option<Result<Result<(), BuildError>, JoinError>>),
    Signal { open: bool },
}

#[derive(Clone)]
struct Worker {
    synthesizer: Arc<dyn Synthesizer>,
    verifier: Arc<dyn Verifier>,
    similarity: Option<Arc<dyn SimilaritySearch>>,
    config: BuildConfig,
    progress: ProgressChannel,
    job: Option<JobBinding>,
    checkpoint: Option<CheckpointBinding>,
    state: Arc<RunState>,
}

type InFlight = JoinSet<Result<(), BuildError>>;

async fn abort_all(in_flight: &mut InFlight) {
    in_flight.abort_all();
    while in_flight.join_next().await.is_some() {}
}

impl Worker {
    /// Dispatches nodes until none are left. Returns `true` if the run was
    /// cancelled.
    async fn drive(&self, mut cancel: watch::Receiver<bool>) -> Result<bool, BuildError> {
        let mut in_flight = InFlight::new();
        let mut cancel_open = true;
        loop {
            if *cancel.borrow_and_update() {
                abort_all(&mut in_flight).await;
                return Ok(true);
            }
            if let Err(err) = self.dispatch_ready(&mut in_flight).await {
                abort_all(&mut in_flight).await;
                return Err(err);
            }
            if in_flight.is_empty() {
                return Ok(false);
            }

            let event = tokio::select! {
                joined = in_flight.join_next() => DriveEvent::Joined(joined),
                changed = cancel.changed(), if cancel_open => DriveEvent::Signal { open: changed.is_ok() },
            };
            match event {
                DriveEvent::Joined(Some(Ok(Err(err)))) => {
                    abort_all(&mut in_flight).await;
                    return Err(err);
                }
                DriveEvent::Joined(Some(Err(join_err))) if !join_err.is_cancelled() => {
                    abort_all(&mut in_flight).await;
                    return Err(BuildError::Worker(join_err.to_string()));
                }
                DriveEvent::Joined(_) => {}
                DriveEvent::Signal { open } => cancel_open = open,
            }
        }
    }

    async fn dispatch_ready(&self, in_flight: &mut InFlight) -> Result<(), BuildError> {
        loop {
            let pending: Vec<NodeId> = self.state.schedule.lock().await.pending().cloned().collect();
            let mut progressed = false;
            for id in pending {
                match self.readiness(&id).await? {
                    Readiness::Waiting => {}
                    Readiness::Blocked(by) => {
                        self.state.schedule.lock().await.mark_processed(&id);
                        info!(node = %id, blocked_by = %by, "node blocked");
                        self.transition(&id, NodeStatus::Blocked, 0).await?;
                        self.record(
                            &id,
                            NodeLedger {
                                failure: Some(FailureCause::BlockedBy { node: by }),
                                ..NodeLedger::default()
                            },
                        )
                        .await;
                        progressed = true;
                    }
                    Readiness::Ready if in_flight.len() < self.config.max_concurrency => {
                        self.state.schedule.lock().await.mark_processed(&id);
                        let worker = self.clone();
                        in_flight.spawn(async move { worker.process(id).await });
                        progressed = true;
                    }
                    Readiness::Ready => {}
                }
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    async fn readiness(&self, id: &NodeId) -> Result<Readiness, BuildError> {
        let graph = self.state.graph.read().await;
        for pred in graph.ordering_predecessors(id)? {
            if !graph.get_node(&pred)?.status.is_terminal() {
                return Ok(Readiness::Waiting);
            }
        }
        for pred in graph.neighbors(id, EdgeKind::DependsOn, Direction::Incoming)? {
            if graph.get_node(&pred)?.status != NodeStatus::Passed {
                return Ok(Readiness::Blocked(pred));
            }
        }
        Ok(Readiness::Ready)
    }

    async fn process(self, id: NodeId) -> Result<(), BuildError> {
        let node = NodeBrief::from(self.state.graph.read().await.get_node(&id)?);
        let mut attempts = 0u32;
        let mut environment_retries = 0u32;
        let mut failures: Vec<String> = Vec::new();
        let mut repair: Option<RepairContext> = None;

        self.transition(&id, NodeStatus::Synthesizing, 1).await?;
        loop {
            let attempt = attempts + 1;
            let round = self
                .round(&id, &node, repair.as_ref(), attempt, &mut environment_retries)
                .await?;
            match round {
                Round::Pass(candidate) => {
                    info!(node = %id, attempt, "node passed");
                    let output = GeneratedOutput {
                        content: candidate.content,
                        attempts: attempt,
                    };
                    self.commit(&id, NodeStatus::Passed, attempt, Some(output)).await?;
                    self.record(
                        &id,
                        NodeLedger {
                            attempts: attempt,
                            environment_retries,
                            failure: None,
                        },
                    )
                    .await;
                    return Ok(());
                }
                Round::EnvironmentExhausted(detail) => {
                    warn!(node = %id, retries = environment_retries, detail = %detail, "environment budget exhausted");
                    self.transition(&id, NodeStatus::Failed, attempt).await?;
                    self.record(
                        &id,
                        NodeLedger {
                            attempts,
                            environment_retries,
                            failure: Some(FailureCause::Environment { detail }),
                        },
                    )
                    .await;
                    return Ok(());
                }
                Round::Behavioral {
                    diagnostic,
                    candidate,
                } => {
                    attempts = attempt;
                    failures.push(diagnostic.clone());
                    if attempts >= self.config.max_retries {
                        warn!(node = %id, attempts, "retries exhausted");
                        self.transition(&id, NodeStatus::Failed, attempts).await?;
                        self.record(
                            &id,
                            NodeLedger {
                                attempts,
                                environment_retries,
                                failure: Some(FailureCause::Behavioral { diagnostic }),
                            },
                        )
                        .await;
                        return Ok(());
                    }
                    debug!(node = %id, attempt, diagnostic = %diagnostic, "attempt failed, repairing");
                    self.transition(&id, NodeStatus::Repairing, attempts).await?;
                    repair = Some(
                        self.repair_context(&id, attempts + 1, candidate, &failures)
                            .await?,
                    );
                    self.transition(&id, NodeStatus::Synthesizing, attempts + 1).await?;
                }
            }
        }
    }

    /// One synthesize+verify round. Environment failures are retried in
    /// place against the node's environment budget.
    async fn round(
        &self,
        id: &NodeId,
        node: &NodeBrief,
        repair: Option<&RepairContext>,
        attempt: u32,
        environment_retries: &mut u32,
    ) -> Result<Round, BuildError> {
        let policy = self.config.verdict_policy;

        let candidate = loop {
            let synthesized = timeout(
                self.config.synthesis_timeout(),
                self.synthesizer.synthesize(node, repair),
            )
            .await;
            let failure = match synthesized {
                Ok(Ok(candidate)) => break candidate,
                Ok(Err(err @ SynthesisError::Malformed(_))) => Failure::Behavioral(err.to_string()),
                Ok(Err(err @ SynthesisError::Transient(_))) => Failure::Environment(err.to_string()),
                Err(_) => {
                    warn!(node = %id, attempt, "synthesis timed out");
                    Failure::timeout(
                        policy,
                        format!("synthesis timed out after {}s", self.config.synthesis_timeout_secs),
                    )
                }
            };
            match failure {
                Failure::Behavioral(diagnostic) => {
                    return Ok(Round::Behavioral {
                        diagnostic,
                        candidate: None,
                    })
                }
                Failure::Environment(detail) => {
                    if !self.retry_environment(id, environment_retries, &detail) {
                        return Ok(Round::EnvironmentExhausted(detail));
                    }
                }
            }
        };

        self.apply_discovered(id, &candidate.discovered).await?;
        self.transition(id, NodeStatus::Validating, attempt).await?;

        loop {
            let verified = timeout(
                self.config.verification_timeout(),
                self.verifier.verify(&candidate, node),
            )
            .await;
            let failure = match verified {
                Ok(Verdict::Pass) => return Ok(Round::Pass(candidate)),
                Ok(Verdict::Fail { diagnostic }) => Failure::Behavioral(diagnostic),
                Ok(Verdict::EnvironmentError { detail }) if policy.environment_as_behavioral => {
                    Failure::Behavioral(detail)
                }
                Ok(Verdict::EnvironmentError { detail }) => Failure::Environment(detail),
                Err(_) => {
                    warn!(node = %id, attempt, "verification timed out");
                    Failure::timeout(
                        policy,
                        format!(
                            "verification timed out after {}s",
                            self.config.verification_timeout_secs
                        ),
                    )
                }
            };
            match failure {
                Failure::Behavioral(diagnostic) => {
                    return Ok(Round::Behavioral {
                        diagnostic,
                        candidate: Some(candidate.content),
                    })
                }
                Failure::Environment(detail) => {
                    if !self.retry_environment(id, environment_retries, &detail) {
                        return Ok(Round::EnvironmentExhausted(detail));
                    }
                }
            }
        }
    }

    fn retry_environment(&self, id: &NodeId, used: &mut u32, detail: &str) -> bool {
        if *used >= self.config.max_environment_retries {
            return false;
        }
        *used += 1;
        warn!(node = %id, retry = *used, detail = %detail, "environment failure, retrying");
        self.progress.publish(ProgressEvent::EnvironmentRetry {
            node: id.clone(),
            retry: *used,
            detail: detail.to_string(),
        });
        true
    }

    /// Adds edges a synthesizer discovered and reconciles the schedule.
    /// An edge the schedule cannot honor is removed again and aborts the
    /// run.
    async fn apply_discovered(&self, id: &NodeId, edges: &[Edge]) -> Result<(), BuildError> {
        for edge in edges {
            let mut graph = self.state.graph.write().await;
            if !graph.add_edge_acyclic(edge.clone())? {
                continue;
            }
            let reordered = {
                let mut schedule = self.state.schedule.lock().await;
                match schedule.reorder_after_mutation(&graph, edge) {
                    Ok(reordered) => reordered,
                    Err(err) => {
                        graph.remove_edge(&edge.key())?;
                        return Err(err.into());
                    }
                }
            };
            if let Some(checkpoint) = &self.checkpoint {
                checkpoint
                    .store
                    .lock()
                    .await
                    .insert_edge(checkpoint.run, edge)?;
            }
            info!(node = %id, edge = %edge, reordered, "edge discovered");
            self.progress.publish(ProgressEvent::EdgeDiscovered {
                edge: edge.clone(),
                reordered,
            });
        }
        Ok(())
    }

    async fn repair_context(
        &self,
        id: &NodeId,
        attempt: u32,
        previous_candidate: Option<String>,
        failures: &[String],
    ) -> Result<RepairContext, BuildError> {
        let graph = self.state.graph.read().await;
        let schedule = self.state.schedule.lock().await;
        let mut engine = LocalizationEngine::new(&graph)
            .with_schedule(&schedule)
            .with_radius(self.config.context_depth);
        if let Some(similarity) = &self.similarity {
            engine = engine.with_similarity(&**similarity);
        }

        let dependencies: Vec<ContextEntry> = engine
            .ancestors(id, self.config.context_depth)?
            .into_iter()
            .filter_map(|found| self.context_entry(&graph, found))
            .collect();

        let node = graph.get_node(id)?;
        let query = match &node.metadata.doc {
            Some(doc) => format!("{} {doc}", node.name),
            None => node.name.clone(),
        };
        let related: Vec<ContextEntry> = engine
            .find_related(&query, Some(id), self.config.related_limit)?
            .into_iter()
            .filter(|found| !dependencies.iter().any(|dep| dep.id == found.id))
            .filter_map(|found| self.context_entry(&graph, found))
            .collect();

        debug!(
            node = %id,
            attempt,
            dependencies = dependencies.len(),
            related = related.len(),
            "repair context built"
        );
        Ok(RepairContext {
            attempt,
            previous_candidate,
            failures: failures.to_vec(),
            dependencies,
            related,
        })
    }

    fn context_entry(&self, graph: &GraphStore, found: RelatedNode) -> Option<ContextEntry> {
        let node = graph.node(&found.id)?;
        let distance = match found.relevance {
            Relevance::Structural { distance } => Some(distance),
            _ => None,
        };
        let excerpt = node
            .metadata
            .output
            .as_ref()
            .map(|output| excerpt(&output.content, self.config.excerpt_chars));
        Some(ContextEntry {
            id: found.id,
            summary: node.summary(),
            distance,
            excerpt,
        })
    }

    async fn transition(&self, id: &NodeId, next: NodeStatus, attempt: u32) -> Result<(), BuildError> {
        self.commit(id, next, attempt, None).await
    }

    /// Applies a transition (and, on PASSED, the output) under the graph
    /// write lock, then checkpoints, counts and publishes it.
    async fn commit(
        &self,
        id: &NodeId,
        next: NodeStatus,
        attempt: u32,
        output: Option<GeneratedOutput>,
    ) -> Result<(), BuildError> {
        let mut graph = self.state.graph.write().await;
        let previous = graph.set_status(id, next)?;
        let has_output = output.is_some();
        if let Some(output) = output {
            graph.record_output(id, output)?;
        }
        if let Some(checkpoint) = &self.checkpoint {
            let mut store = checkpoint.store.lock().await;
            if has_output {
                store.update_node(checkpoint.run, graph.get_node(id)?)?;
            } else {
                store.update_status(checkpoint.run, id, next)?;
            }
            debug!(node = %id, run = %checkpoint.run, status = %next, "checkpoint written");
        }
        if let Some(job) = &self.job {
            job.store.record_transition(job.id, previous, next);
        }
        debug!(node = %id, from = %previous, to = %next, attempt, "transition");
        self.progress.publish(ProgressEvent::Transition {
            node: id.clone(),
            from: previous,
            to: next,
            attempt,
        });
        Ok(())
    }

    async fn record(&self, id: &NodeId, entry: NodeLedger) {
        self.state.ledger.lock().await.insert(id.clone(), entry);
    }

    /// Marks every non-terminal node BLOCKED with `cause`.
    async fn block_unfinished(&self, cause: FailureCause) -> Result<(), BuildError> {
        let unfinished: Vec<NodeId> = self
            .state
            .graph
            .read()
            .await
            .nodes()
            .filter(|node| !node.status.is_terminal())
            .map(|node| node.id.clone())
            .collect();
        for id in unfinished {
            self.state.schedule.lock().await.mark_processed(&id);
            self.transition(&id, NodeStatus::Blocked, 0).await?;
            self.state
                .ledger
                .lock()
                .await
                .entry(id)
                .or_default()
                .failure = Some(cause.clone());
        }
        Ok(())
    }

    async fn checkpoint_snapshot(&self) -> Result<(), BuildError> {
        if let Some(checkpoint) = &self.checkpoint {
            let snapshot = self.state.graph.read().await.snapshot();
            checkpoint
                .store
                .lock()
                .await
                .save_snapshot(checkpoint.run, &snapshot)?;
            debug!(run = %checkpoint.run, nodes = snapshot.nodes.len(), "checkpoint saved");
        }
        Ok(())
    }

    async fn finish(&self, cancelled: bool) -> (GenerationReport, GraphStore) {
        let graph = self.state.graph.read().await.clone();
        let order = self.state.schedule.lock().await.order().to_vec();
        let ledger = self.state.ledger.lock().await;
        let nodes = order
            .iter()
            .filter_map(|id| graph.node(id))
            .map(|node| {
                let entry = ledger.get(&node.id).cloned().unwrap_or_default();
                let content_digest = match (&node.metadata.output, node.status) {
                    (Some(output), NodeStatus::Passed) => {
                        Some(content_digest(&output.content).to_hex().to_string())
                    }
                    _ => None,
                };
                NodeReport {
                    id: node.id.clone(),
                    kind: node.kind,
                    status: node.status,
                    attempts: entry.attempts,
                    environment_retries: entry.environment_retries,
                    failure: entry.failure,
                    content_digest,
                }
            })
            .collect();
        (GenerationReport::assemble(order, nodes, cancelled), graph)
    }
}

fn excerpt(content: &str, limit: usize) -> String {
    match content.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}\n...", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use rpgen_core::{Node, NodeKind};
    use rpgen_storage::InMemoryStore;

    use super::*;
    use crate::jobs::{InMemoryJobStore, JobState};
    use crate::report::{IntegrationStatus, RunOutcome};

    #[derive(Default)]
    struct ScriptedSynthesizer {
        discovered: HashMap<String, Vec<Edge>>,
        transient: StdMutex<HashMap<String, u32>>,
        malformed: HashSet<String>,
        hang: HashSet<String>,
        cancel_on: Option<(String, CancelHandle)>,
        calls: StdMutex<Vec<(String, Option<RepairContext>)>>,
    }

    impl ScriptedSynthesizer {
        fn calls_for(&self, id: &str) -> Vec<Option<RepairContext>> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(node, _)| node == id)
                .map(|(_, repair)| repair.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Synthesizer for ScriptedSynthesizer {
        async fn synthesize(
            &self,
            node: &NodeBrief,
            repair: Option<&RepairContext>,
        ) -> Result<Candidate, SynthesisError> {
            let id = node.id.to_string();
            self.calls.lock().unwrap().push((id.clone(), repair.cloned()));
            if let Some((target, handle)) = &self.cancel_on {
                if *target == id {
                    handle.cancel();
                    std::future::pending::<()>().await;
                }
            }
            if self.hang.contains(&id) {
                std::future::pending::<()>().await;
            }
            let transient = {
                let mut remaining = self.transient.lock().unwrap();
                match remaining.get_mut(&id) {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if transient {
                return Err(SynthesisError::Transient("rate limited".into()));
            }
            if self.malformed.contains(&id) {
                return Err(SynthesisError::Malformed("no code block".into()));
            }
            let mut candidate = Candidate::new(format!("// {}", node.name));
            if repair.is_none() {
                for edge in self.discovered.get(&id).into_iter().flatten() {
                    candidate = candidate.with_edge(edge.clone());
                }
            }
            Ok(candidate)
        }
    }

    #[derive(Default)]
    struct ScriptedVerifier {
        verdicts: StdMutex<HashMap<String, VecDeque<Verdict>>>,
    }

    impl ScriptedVerifier {
        fn script(self, id: &str, verdicts: impl IntoIterator<Item = Verdict>) -> Self {
            self.verdicts
                .lock()
                .unwrap()
                .insert(id.to_string(), verdicts.into_iter().collect());
            self
        }
    }

    #[async_trait]
    impl Verifier for ScriptedVerifier {
        async fn verify(&self, _candidate: &Candidate, node: &NodeBrief) -> Verdict {
            self.verdicts
                .lock()
                .unwrap()
                .get_mut(node.id.as_str())
                .and_then(VecDeque::pop_front)
                .unwrap_or(Verdict::Pass)
        }
    }

    fn fail(diagnostic: &str) -> Verdict {
        Verdict::Fail {
            diagnostic: diagnostic.into(),
        }
    }

    fn env_error() -> Verdict {
        Verdict::EnvironmentError {
            detail: "runner offline".into(),
        }
    }

    /// A (capability), B (artifact, depends on A), C (behavioral unit
    /// inside B, depends on A).
    fn abc() -> GraphStore {
        let mut g = GraphStore::new();
        g.add_node(Node::new("a", NodeKind::Capability, "auth")).unwrap();
        g.add_node(Node::new("c", NodeKind::BehavioralUnit, "login").with_doc("log a user in"))
            .unwrap();
        g.add_node(Node::new("b", NodeKind::Artifact, "session")).unwrap();
        g.add_edge(Edge::depends_on("a", "b")).unwrap();
        g.add_edge(Edge::contains("b", "c")).unwrap();
        g.add_edge(Edge::depends_on("a", "c")).unwrap();
        g
    }

    fn units(ids: &[&str]) -> GraphStore {
        let mut g = GraphStore::new();
        for id in ids {
            g.add_node(Node::new(*id, NodeKind::BehavioralUnit, *id)).unwrap();
        }
        g
    }

    fn controller(
        synthesizer: ScriptedSynthesizer,
        verifier: ScriptedVerifier,
        config: BuildConfig,
    ) -> (GenerationController, Arc<ScriptedSynthesizer>) {
        let synthesizer = Arc::new(synthesizer);
        let controller =
            GenerationController::new(synthesizer.clone(), Arc::new(verifier), config);
        (controller, synthesizer)
    }

    fn memory_store() -> SharedCheckpointStore {
        let store: Box<dyn CheckpointStore + Send> = Box::new(InMemoryStore::new());
        Arc::new(Mutex::new(store))
    }

    fn sequential() -> BuildConfig {
        BuildConfig {
            max_concurrency: 1,
            ..BuildConfig::default()
        }
    }

    fn ids(order: &[NodeId]) -> Vec<&str> {
        order.iter().map(NodeId::as_str).collect()
    }

    #[tokio::test]
    async fn repairs_b_once_and_passes_everything() {
        let verifier = ScriptedVerifier::default().script("b", [fail("expected token, got nothing")]);
        let (controller, synthesizer) =
            controller(ScriptedSynthesizer::default(), verifier, BuildConfig::default());

        let outcome = controller.build(abc()).await.unwrap();
        let report = outcome.report;

        assert_eq!(ids(&report.order), vec!["a", "b", "c"]);
        let attempts: Vec<(&str, NodeStatus, u32)> = report
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.status, n.attempts))
            .collect();
        assert_eq!(
            attempts,
            vec![
                ("a", NodeStatus::Passed, 1),
                ("b", NodeStatus::Passed, 2),
                ("c", NodeStatus::Passed, 1),
            ]
        );
        assert_eq!(report.pass_rate, 1.0);
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(report.nodes.iter().all(|n| n.content_digest.is_some()));

        let calls = synthesizer.calls_for("b");
        assert_eq!(calls.len(), 2);
        assert!(calls[0].is_none());
        let repair = calls[1].as_ref().unwrap();
        assert_eq!(repair.attempt, 2);
        assert_eq!(repair.last_failure(), Some("expected token, got nothing"));
        assert_eq!(repair.previous_candidate.as_deref(), Some("// session"));
        assert_eq!(repair.dependencies[0].id.as_str(), "a");
        assert_eq!(repair.dependencies[0].distance, Some(1));
        assert_eq!(repair.dependencies[0].excerpt.as_deref(), Some("// auth"));

        let b = outcome.graph.get_node("b").unwrap();
        assert_eq!(b.metadata.output.as_ref().unwrap().attempts, 2);
    }

    #[tokio::test]
    async fn always_failing_node_stops_at_max_retries_and_blocks_dependents() {
        let mut graph = units(&["x", "y", "z"]);
        graph.add_edge(Edge::depends_on("x", "y")).unwrap();
        graph.add_edge(Edge::depends_on("y", "z")).unwrap();
        let verifier = ScriptedVerifier::default().script("x", (0..10).map(|i| fail(&format!("run {i}"))));
        let config = BuildConfig {
            max_retries: 3,
            ..BuildConfig::default()
        };
        let (controller, synthesizer) = controller(ScriptedSynthesizer::default(), verifier, config);

        let report = controller.build(graph).await.unwrap().report;

        let x = report.node("x").unwrap();
        assert_eq!(x.status, NodeStatus::Failed);
        assert_eq!(x.attempts, 3);
        assert_eq!(
            x.failure,
            Some(FailureCause::Behavioral {
                diagnostic: "run 2".into()
            })
        );
        assert_eq!(
            report.node("y").unwrap().failure,
            Some(FailureCause::BlockedBy { node: "x".into() })
        );
        assert_eq!(
            report.node("z").unwrap().failure,
            Some(FailureCause::BlockedBy { node: "y".into() })
        );
        assert_eq!((report.passed, report.failed, report.blocked), (0, 1, 2));
        assert_eq!(report.outcome, RunOutcome::Partial);
        assert!(synthesizer.calls_for("y").is_empty());
        assert!(synthesizer.calls_for("z").is_empty());
    }

    #[tokio::test]
    async fn order_predecessor_failure_does_not_block() {
        let mut graph = units(&["x", "y"]);
        graph.add_edge(Edge::new("x", "y", EdgeKind::Order)).unwrap();
        let verifier = ScriptedVerifier::default().script("x", [fail("no"), fail("no")]);
        let config = BuildConfig {
            max_retries: 2,
            ..BuildConfig::default()
        };
        let (controller, _) = controller(ScriptedSynthesizer::default(), verifier, config);

        let report = controller.build(graph).await.unwrap().report;
        assert_eq!(report.node("x").unwrap().status, NodeStatus::Failed);
        assert_eq!(report.node("y").unwrap().status, NodeStatus::Passed);
    }

    #[tokio::test]
    async fn environment_errors_do_not_consume_attempts() {
        let verifier = ScriptedVerifier::default().script("x", [env_error(), env_error()]);
        let (controller, _) =
            controller(ScriptedSynthesizer::default(), verifier, BuildConfig::default());

        let report = controller.build(units(&["x"])).await.unwrap().report;
        let x = report.node("x").unwrap();
        assert_eq!(x.status, NodeStatus::Passed);
        assert_eq!(x.attempts, 1);
        assert_eq!(x.environment_retries, 2);
    }

    #[tokio::test]
    async fn exhausted_environment_budget_is_reported_separately() {
        let mut graph = units(&["x", "y"]);
        graph.add_edge(Edge::depends_on("x", "y")).unwrap();
        let verifier = ScriptedVerifier::default().script("x", [env_error(), env_error(), env_error()]);
        let (controller, _) =
            controller(ScriptedSynthesizer::default(), verifier, BuildConfig::default());

        let report = controller.build(graph).await.unwrap().report;
        let x = report.node("x").unwrap();
        assert_eq!(x.status, NodeStatus::Failed);
        assert_eq!(x.attempts, 0);
        assert!(matches!(x.failure, Some(FailureCause::Environment { .. })));
        assert_eq!(report.node("y").unwrap().status, NodeStatus::Blocked);
        assert_eq!(report.outcome, RunOutcome::EnvironmentFailure);
    }

    #[tokio::test]
    async fn policy_can_count_environment_errors_as_attempts() {
        let verifier = ScriptedVerifier::default().script("x", [env_error()]);
        let config = BuildConfig {
            verdict_policy: VerdictPolicy {
                environment_as_behavioral: true,
                ..VerdictPolicy::default()
            },
            ..BuildConfig::default()
        };
        let (controller, _) = controller(ScriptedSynthesizer::default(), verifier, config);

        let report = controller.build(units(&["x"])).await.unwrap().report;
        let x = report.node("x").unwrap();
        assert_eq!((x.attempts, x.environment_retries), (2, 0));
    }

    #[tokio::test]
    async fn transient_synthesizer_errors_use_environment_budget() {
        let synthesizer = ScriptedSynthesizer {
            transient: StdMutex::new(HashMap::from([("x".to_string(), 1)])),
            ..ScriptedSynthesizer::default()
        };
        let (controller, _) =
            controller(synthesizer, ScriptedVerifier::default(), BuildConfig::default());

        let report = controller.build(units(&["x"])).await.unwrap().report;
        let x = report.node("x").unwrap();
        assert_eq!(x.status, NodeStatus::Passed);
        assert_eq!((x.attempts, x.environment_retries), (1, 1));
    }

    #[tokio::test]
    async fn malformed_output_consumes_attempts() {
        let synthesizer = ScriptedSynthesizer {
            malformed: HashSet::from(["x".to_string()]),
            ..ScriptedSynthesizer::default()
        };
        let config = BuildConfig {
            max_retries: 2,
            ..BuildConfig::default()
        };
        let (controller, synthesizer) = controller(synthesizer, ScriptedVerifier::default(), config);

        let report = controller.build(units(&["x"])).await.unwrap().report;
        let x = report.node("x").unwrap();
        assert_eq!(x.status, NodeStatus::Failed);
        assert_eq!(x.attempts, 2);
        let repair = synthesizer.calls_for("x")[1].clone().unwrap();
        assert!(repair.previous_candidate.is_none());
        assert_eq!(repair.failures, vec!["malformed candidate: no code block".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn synthesis_timeout_counts_as_attempt() {
        let synthesizer = ScriptedSynthesizer {
            hang: HashSet::from(["x".to_string()]),
            ..ScriptedSynthesizer::default()
        };
        let config = BuildConfig {
            max_retries: 2,
            synthesis_timeout_secs: 1,
            ..BuildConfig::default()
        };
        let (controller, _) = controller(synthesizer, ScriptedVerifier::default(), config);

        let report = controller.build(units(&["x"])).await.unwrap().report;
        let x = report.node("x").unwrap();
        assert_eq!(x.status, NodeStatus::Failed);
        assert_eq!(x.attempts, 2);
        assert_eq!(x.environment_retries, 0);
    }

    #[tokio::test]
    async fn never_synthesizes_before_predecessors_are_terminal() {
        let mut graph = units(&["a", "b", "c", "d", "e"]);
        graph.add_edge(Edge::depends_on("a", "c")).unwrap();
        graph.add_edge(Edge::depends_on("b", "c")).unwrap();
        graph.add_edge(Edge::new("c", "d", EdgeKind::Order)).unwrap();
        graph.add_edge(Edge::depends_on("a", "e")).unwrap();
        let verifier = ScriptedVerifier::default().script("b", [fail("flaky"), fail("flaky")]);
        let (controller, _) =
            controller(ScriptedSynthesizer::default(), verifier, BuildConfig::default());
        let mut events = controller.subscribe();
        let predecessors = |id: &str| -> Vec<NodeId> { graph.ordering_predecessors(id).unwrap() };
        let expected: HashMap<String, Vec<NodeId>> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| (id.to_string(), predecessors(id)))
            .collect();

        controller.build(graph.clone()).await.unwrap();

        let mut terminal: HashSet<NodeId> = HashSet::new();
        let mut synthesized = 0;
        while let Ok(event) = events.try_recv() {
            if let ProgressEvent::Transition { node, to, .. } = event {
                if to == NodeStatus::Synthesizing {
                    synthesized += 1;
                    for pred in &expected[node.as_str()] {
                        assert!(terminal.contains(pred), "{node} started before {pred} finished");
                    }
                }
                if to.is_terminal() {
                    terminal.insert(node);
                }
            }
        }
        assert!(synthesized >= 5);
        assert_eq!(terminal.len(), 5);
    }

    #[tokio::test]
    async fn cancel_blocks_unfinished_and_persists_partial_graph() {
        let cancel = CancelHandle::new();
        let synthesizer = ScriptedSynthesizer {
            cancel_on: Some(("c".to_string(), cancel.clone())),
            ..ScriptedSynthesizer::default()
        };
        let store = memory_store();
        let run = store.lock().await.create_run("abc").unwrap();
        let (controller, _) = controller(synthesizer, ScriptedVerifier::default(), sequential());
        let controller = controller
            .with_cancel_handle(cancel)
            .with_checkpoints(store.clone(), run);

        let outcome = controller.build(abc()).await.unwrap();
        let report = &outcome.report;

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.node("a").unwrap().status, NodeStatus::Passed);
        assert_eq!(report.node("b").unwrap().status, NodeStatus::Passed);
        assert_eq!(report.node("c").unwrap().status, NodeStatus::Blocked);
        assert_eq!(report.node("c").unwrap().failure, Some(FailureCause::Cancelled));

        let restored = store.lock().await.load_graph(run).unwrap();
        let statuses = |g: &GraphStore| -> Vec<(String, NodeStatus)> {
            g.nodes().map(|n| (n.id.to_string(), n.status)).collect()
        };
        assert_eq!(statuses(&restored), statuses(&outcome.graph));
        assert_eq!(restored.snapshot(), outcome.graph.snapshot());
    }

    #[tokio::test]
    async fn resume_rebuilds_only_unfinished_nodes() {
        let cancel = CancelHandle::new();
        let store = memory_store();
        let run = store.lock().await.create_run("abc").unwrap();
        let synthesizer = ScriptedSynthesizer {
            cancel_on: Some(("c".to_string(), cancel.clone())),
            ..ScriptedSynthesizer::default()
        };
        let (first, _) = controller(synthesizer, ScriptedVerifier::default(), sequential());
        first
            .with_cancel_handle(cancel)
            .with_checkpoints(store.clone(), run)
            .build(abc())
            .await
            .unwrap();

        let (second, synthesizer) =
            controller(ScriptedSynthesizer::default(), ScriptedVerifier::default(), sequential());
        let report = second
            .with_checkpoints(store.clone(), run)
            .resume()
            .await
            .unwrap()
            .report;

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert!(synthesizer.calls_for("a").is_empty());
        assert!(synthesizer.calls_for("b").is_empty());
        assert_eq!(synthesizer.calls_for("c").len(), 1);
        assert_eq!(report.node("a").unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn discovered_edge_reorders_pending_nodes() {
        let synthesizer = ScriptedSynthesizer {
            discovered: HashMap::from([("a".to_string(), vec![Edge::depends_on("c", "b")])]),
            ..ScriptedSynthesizer::default()
        };
        let (controller, _) = controller(synthesizer, ScriptedVerifier::default(), sequential());
        let mut events = controller.subscribe();

        let outcome = controller.build(units(&["a", "b", "c"])).await.unwrap();

        assert_eq!(ids(&outcome.report.order), vec!["a", "c", "b"]);
        assert!(outcome.graph.contains_edge(&Edge::depends_on("c", "b").key()));
        let mut discovered = false;
        while let Ok(event) = events.try_recv() {
            if let ProgressEvent::EdgeDiscovered { reordered, .. } = event {
                discovered = reordered;
            }
        }
        assert!(discovered);
    }

    #[tokio::test]
    async fn retroactive_edge_aborts_the_run() {
        let synthesizer = ScriptedSynthesizer {
            discovered: HashMap::from([("b".to_string(), vec![Edge::depends_on("c", "b")])]),
            ..ScriptedSynthesizer::default()
        };
        let jobs = Arc::new(InMemoryJobStore::new());
        let job = jobs.create("abc", 3);
        let (controller, synthesizer) =
            controller(synthesizer, ScriptedVerifier::default(), sequential());
        let controller = controller.with_job(jobs.clone(), job);

        let err = controller.build(units(&["a", "b", "c"])).await.unwrap_err();

        assert!(matches!(
            err,
            BuildError::Core(rpgen_core::CoreError::RetroactiveDependency { .. })
        ));
        assert!(synthesizer.calls_for("c").is_empty());
        assert_eq!(jobs.get(job).unwrap().state, JobState::Failed);
    }

    #[tokio::test]
    async fn edge_onto_in_flight_prerequisite_aborts_the_run() {
        let synthesizer = ScriptedSynthesizer {
            discovered: HashMap::from([("b".to_string(), vec![Edge::depends_on("a", "b")])]),
            hang: HashSet::from(["a".to_string()]),
            ..ScriptedSynthesizer::default()
        };
        let store = memory_store();
        let run = store.lock().await.create_run("ab").unwrap();
        let config = BuildConfig {
            max_concurrency: 2,
            ..BuildConfig::default()
        };
        let (controller, synthesizer) = controller(synthesizer, ScriptedVerifier::default(), config);
        let controller = controller.with_checkpoints(store.clone(), run);

        let err = controller.build(units(&["a", "b"])).await.unwrap_err();

        assert!(matches!(
            err,
            BuildError::Core(rpgen_core::CoreError::RetroactiveDependency { .. })
        ));
        assert_eq!(synthesizer.calls_for("b").len(), 1);
        let restored = store.lock().await.load_graph(run).unwrap();
        assert!(!restored.contains_edge(&Edge::depends_on("a", "b").key()));
        for id in ["a", "b"] {
            assert_eq!(restored.get_node(id).unwrap().status, NodeStatus::Blocked);
        }
    }

    #[tokio::test]
    async fn discovered_second_parent_is_refused() {
        let mut graph = abc();
        graph.add_node(Node::new("d", NodeKind::Artifact, "tokens")).unwrap();
        let synthesizer = ScriptedSynthesizer {
            discovered: HashMap::from([("a".to_string(), vec![Edge::contains("d", "c")])]),
            ..ScriptedSynthesizer::default()
        };
        let store = memory_store();
        let run = store.lock().await.create_run("abcd").unwrap();
        let (controller, _) = controller(synthesizer, ScriptedVerifier::default(), sequential());
        let controller = controller.with_checkpoints(store.clone(), run);

        let err = controller.build(graph).await.unwrap_err();

        assert!(matches!(
            err,
            BuildError::Core(rpgen_core::CoreError::ParentConflict { .. })
        ));
        let restored = store.lock().await.load_graph(run).unwrap();
        assert_eq!(restored.parent("c").unwrap().as_deref(), Some("b"));
        assert!(Validator::validate(&restored).is_empty());
    }

    #[tokio::test]
    async fn refuses_graph_with_violations() {
        let mut graph = units(&["a", "b"]);
        graph.add_edge(Edge::depends_on("a", "b")).unwrap();
        graph.add_edge(Edge::depends_on("b", "a")).unwrap();
        let (controller, synthesizer) =
            controller(ScriptedSynthesizer::default(), ScriptedVerifier::default(), BuildConfig::default());

        let err = controller.build(graph).await.unwrap_err();
        match err {
            BuildError::Core(rpgen_core::CoreError::GraphNotBuildable { violations }) => {
                assert!(!violations.is_empty())
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(synthesizer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_record_tracks_the_run() {
        let jobs = Arc::new(InMemoryJobStore::new());
        let job = jobs.create("abc", 3);
        let (controller, _) =
            controller(ScriptedSynthesizer::default(), ScriptedVerifier::default(), BuildConfig::default());
        controller.with_job(jobs.clone(), job).build(abc()).await.unwrap();

        let record = jobs.get(job).unwrap();
        assert_eq!(record.state, JobState::Completed);
        assert_eq!(record.progress.passed, 3);
        assert_eq!(record.progress.pending, 0);
        assert_eq!(record.progress.in_flight, 0);
        assert!(record.report.unwrap().is_complete());
    }

    struct ScriptedIntegration {
        verdict: Verdict,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedIntegration {
        fn new(verdict: Verdict) -> Arc<Self> {
            Arc::new(ScriptedIntegration {
                verdict,
                calls: Default::default(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IntegrationCheck for ScriptedIntegration {
        async fn check(&self) -> Verdict {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.verdict.clone()
        }
    }

    #[tokio::test]
    async fn integration_result_lands_in_the_report() {
        let check = ScriptedIntegration::new(fail("3 of 12 integration tests failed"));
        let jobs = Arc::new(InMemoryJobStore::new());
        let job = jobs.create("abc", 3);
        let (controller, _) = controller(
            ScriptedSynthesizer::default(),
            ScriptedVerifier::default(),
            BuildConfig::default(),
        );
        let controller = controller
            .with_integration(check.clone())
            .with_job(jobs.clone(), job);

        let report = controller.build(abc()).await.unwrap().report;
        assert_eq!(check.calls(), 1);
        assert_eq!(report.outcome, RunOutcome::Completed);
        let integration = report.integration.clone().unwrap();
        assert_eq!(integration.status, IntegrationStatus::Failed);
        assert_eq!(integration.detail.as_deref(), Some("3 of 12 integration tests failed"));
        assert!(!report.is_complete());
        assert_eq!(jobs.get(job).unwrap().report, Some(report));

        let (controller, _) = self::controller(
            ScriptedSynthesizer::default(),
            ScriptedVerifier::default(),
            BuildConfig::default(),
        );
        let controller = controller.with_integration(ScriptedIntegration::new(Verdict::Pass));
        let report = controller.build(abc()).await.unwrap().report;
        assert_eq!(report.integration.as_ref().unwrap().status, IntegrationStatus::Passed);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn integration_is_skipped_when_nothing_passed() {
        let check = ScriptedIntegration::new(Verdict::Pass);
        let verifier = ScriptedVerifier::default().script("x", [fail("no")]);
        let config = BuildConfig {
            max_retries: 1,
            ..BuildConfig::default()
        };
        let (controller, _) = controller(ScriptedSynthesizer::default(), verifier, config);
        let controller = controller.with_integration(check.clone());

        let report = controller.build(units(&["x"])).await.unwrap().report;
        assert_eq!(check.calls(), 0);
        assert_eq!(report.integration.unwrap().status, IntegrationStatus::Skipped);
    }

    #[tokio::test]
    async fn empty_graph_is_vacuously_complete() {
        let report = build(
            GraphStore::new(),
            BuildConfig::default(),
            Arc::new(ScriptedSynthesizer::default()),
            Arc::new(ScriptedVerifier::default()),
        )
        .await
        .unwrap();
        assert_eq!(report.pass_rate, 1.0);
        assert_eq!(report.outcome, RunOutcome::Completed);
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("héllo", 2), "hé\n...");
        assert_eq!(excerpt("short", 10), "short");
    }
}

//! FR-012: Execution engine — orchestration loop for a deployment run.
//!
//! validate → DAG → batches → network check → reconcile → for each batch:
//! resolve inputs → (mark pending → submit → record) → confirm → journal → events

use super::config::EngineConfig;
use super::error::{DeployError, Result};
use super::graph::{build_graph, DeploymentGraph};
use super::journal::Journal;
use super::reconciler;
use super::resolver;
use super::state;
use super::types::*;
use crate::environment::{Confirmation, EnvironmentError, OperationSpec, Overrides, TargetEnvironment};
use crate::tripwire::eventlog;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument};

/// Caller-side switch that stops a run from starting new steps.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancel handle plus the optional run deadline, checked before any step starts.
#[derive(Debug, Clone)]
struct StopSignal {
    cancel: CancelHandle,
    deadline: Option<Instant>,
}

impl StopSignal {
    fn is_set(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Provenance sink; a no-op unless a state directory is configured.
#[derive(Debug, Clone)]
struct EventSink {
    state_dir: Option<PathBuf>,
    module: String,
}

impl EventSink {
    fn new(config: &EngineConfig, module: &str) -> Self {
        Self {
            state_dir: config.state_dir.clone().filter(|_| config.event_log),
            module: module.to_string(),
        }
    }

    fn emit(&self, event: ProvenanceEvent) {
        if let Some(ref dir) = self.state_dir {
            if let Err(e) = eventlog::append_event(dir, &self.module, event) {
                warn!(module = %self.module, error = %e, "cannot write provenance event");
            }
        }
    }
}

/// Deployment engine bound to one target environment and one journal.
pub struct Engine<E: TargetEnvironment, J: Journal> {
    env: Arc<E>,
    journal: Arc<Mutex<J>>,
    config: EngineConfig,
    cancel: CancelHandle,
}

impl<E, J> Engine<E, J>
where
    E: TargetEnvironment + 'static,
    J: Journal + 'static,
{
    pub fn new(env: Arc<E>, journal: J, config: EngineConfig) -> Self {
        Self::with_shared_journal(env, Arc::new(Mutex::new(journal)), config)
    }

    pub fn with_shared_journal(env: Arc<E>, journal: Arc<Mutex<J>>, config: EngineConfig) -> Self {
        Self {
            env,
            journal,
            config,
            cancel: CancelHandle::default(),
        }
    }

    pub fn journal(&self) -> Arc<Mutex<J>> {
        Arc::clone(&self.journal)
    }

    /// Handle that stops scheduling new steps in the current and future runs.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Dry run: validate, batch and reconcile without touching the environment.
    pub async fn plan(&self, module: &Module, params: &DeploymentParameters) -> Result<ReconciliationPlan> {
        let graph = build_graph(module, params)?;
        resolver::execution_batches(&graph)?;
        let journal = self.journal.lock().await;
        Ok(reconciler::reconcile(&graph, &*journal))
    }

    /// Execute a module against the target environment.
    pub async fn deploy(&self, module: &Module, params: &DeploymentParameters) -> Result<DeploymentReport> {
        let problems = self.config.validate();
        if !problems.is_empty() {
            return Err(DeployError::Config(problems.join("; ")));
        }

        let started = Instant::now();
        let graph = build_graph(module, params)?;
        let batches = resolver::execution_batches(&graph)?;

        let network_id = self.env.current_network_id().await?;
        let plan = {
            let mut journal = self.journal.lock().await;
            journal.bind_network(network_id)?;
            reconciler::reconcile(&graph, &*journal)
        };

        let run_id = eventlog::generate_run_id();
        let span = info_span!("deploy", module = %module.name, run_id = %run_id);
        self.run(Arc::new(graph), batches, plan, network_id, run_id, started)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        graph: Arc<DeploymentGraph>,
        batches: Vec<ExecutionBatch>,
        plan: ReconciliationPlan,
        network_id: u64,
        run_id: String,
        started: Instant,
    ) -> Result<DeploymentReport> {
        let module = graph.module_name().to_string();
        let events = EventSink::new(&self.config, &module);
        events.emit(ProvenanceEvent::RunStarted {
            module: module.clone(),
            run_id: run_id.clone(),
            network_id,
            fragua_version: env!("CARGO_PKG_VERSION").to_string(),
        });
        info!(
            network_id,
            steps = graph.len(),
            batches = batches.len(),
            reuse = plan.reused,
            work = plan.pending_work(),
            "run started"
        );

        let stop = StopSignal {
            cancel: self.cancel.clone(),
            deadline: self.config.run_timeout().map(|t| started + t),
        };
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut run = RunState::new(&graph);
        let mut halt: Option<DeployError> = None;

        for batch in &batches {
            if stop.is_set() {
                break;
            }
            info!(batch = batch.index, steps = batch.steps.len(), "batch started");

            let mut tasks: JoinSet<(StepId, Result<StepOutcome>)> = JoinSet::new();
            for id in &batch.steps {
                if stop.is_set() {
                    break;
                }
                let (Some(step), Some(reconciled)) = (graph.step(id), plan.steps.get(id)) else {
                    continue;
                };

                if let Some(blocker) = run.failed_ancestor(&graph, id) {
                    debug!(step = %id, blocked_by = %blocker, "step blocked");
                    events.emit(ProvenanceEvent::StepBlocked {
                        module: module.clone(),
                        step: id.clone(),
                        blocked_by: blocker.clone(),
                    });
                    run.block(id, blocker);
                    continue;
                }

                let resume = match &reconciled.action {
                    ReconcileAction::Reuse {
                        result,
                        transaction,
                    } => {
                        debug!(step = %id, "reusing journaled result");
                        events.emit(ProvenanceEvent::StepReused {
                            module: module.clone(),
                            step: id.clone(),
                        });
                        run.reuse(id, result.clone(), transaction.clone());
                        continue;
                    }
                    ReconcileAction::Stale { reason } => {
                        let err = DeployError::StaleStep {
                            step: id.clone(),
                            reason: reason.clone(),
                        };
                        warn!(step = %id, "{}", err);
                        run.fail_before_submit(&events, id, StepErrorKind::StaleStep, err.to_string());
                        continue;
                    }
                    ReconcileAction::Indeterminate => {
                        let message = "pending marker has no transaction; the operation may or may not have been sent. Verify the target environment and clear the marker".to_string();
                        warn!(step = %id, "indeterminate submission");
                        run.fail_before_submit(&events, id, StepErrorKind::IndeterminateSubmission, message);
                        continue;
                    }
                    ReconcileAction::Resume { transaction } => Some(transaction.clone()),
                    ReconcileAction::Retry | ReconcileAction::Execute => None,
                };

                let spec = match resolve_operation(step, &graph, &run) {
                    Ok(spec) => spec,
                    Err(message) => {
                        warn!(step = %id, error = %message, "input resolution failed");
                        run.fail_before_submit(&events, id, StepErrorKind::InputResolution, message);
                        continue;
                    }
                };

                events.emit(ProvenanceEvent::StepStarted {
                    module: module.clone(),
                    step: id.clone(),
                    action: reconciled.action.to_string(),
                });
                let task = StepTask {
                    env: Arc::clone(&self.env),
                    journal: Arc::clone(&self.journal),
                    config: self.config.clone(),
                    events: events.clone(),
                    semaphore: Arc::clone(&semaphore),
                    stop: stop.clone(),
                    step_id: id.clone(),
                    kind: step.kind(),
                    fingerprint: reconciled.fingerprint.clone(),
                    depth: step.constraints.confirmations.unwrap_or(self.config.confirmations),
                    spec,
                    resume,
                };
                let span = info_span!("step", module = %module, step = %id);
                tasks.spawn(task.run().instrument(span));
            }

            // drain in-flight steps before acting on cancellation or errors
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((id, Ok(outcome))) => run.finish(&id, outcome),
                    Ok((id, Err(err))) => {
                        warn!(step = %id, error = %err, "journal write failed, halting run");
                        if halt.is_none() {
                            halt = Some(err);
                        }
                    }
                    Err(join_err) => {
                        if halt.is_none() {
                            halt = Some(DeployError::Task(join_err.to_string()));
                        }
                    }
                }
            }

            if let Some(err) = halt.take() {
                return Err(err);
            }
        }

        let cancelled = run.has_unfinished();
        if cancelled {
            warn!("run cancelled; unstarted steps left pending");
        }

        let report = run.into_report(&graph, run_id, network_id, cancelled, started.elapsed());

        if self.config.lock_file {
            if let Some(ref dir) = self.config.state_dir {
                if let Err(e) = state::save_lock(dir, &state::lock_from_report(&report)) {
                    warn!(error = %e, "cannot write lock snapshot");
                }
            }
        }

        events.emit(ProvenanceEvent::RunCompleted {
            module: module.clone(),
            run_id: report.run_id.clone(),
            outcome: report.outcome,
            steps_submitted: report.submitted,
            steps_reused: report.reused,
            steps_failed: report.failed,
            steps_blocked: report.blocked,
            total_seconds: report.total_duration.as_secs_f64(),
        });
        info!(
            outcome = %report.outcome,
            submitted = report.submitted,
            reused = report.reused,
            failed = report.failed,
            blocked = report.blocked,
            "run completed"
        );

        Ok(report)
    }
}

// ============================================================================
// Run bookkeeping
// ============================================================================

/// Terminal outcome of a step task.
#[derive(Debug)]
struct StepOutcome {
    status: StepStatus,
    result: Option<Value>,
    transaction: Option<TransactionRef>,
    failure: Option<StepFailure>,
    attempts: u32,
    duration: Duration,
    /// The environment accepted an operation for this step during this run.
    accepted: bool,
}

impl StepOutcome {
    /// The run stopped while the step waited for a permit.
    fn not_started() -> Self {
        Self {
            status: StepStatus::Pending,
            result: None,
            transaction: None,
            failure: None,
            attempts: 0,
            duration: Duration::ZERO,
            accepted: false,
        }
    }
}

/// Resolved values and per-step reports for one run.
struct RunState {
    values: HashMap<StepId, Value>,
    transactions: HashMap<StepId, TransactionRef>,
    reports: IndexMap<StepId, StepReport>,
    submitted: u32,
}

impl RunState {
    fn new(graph: &DeploymentGraph) -> Self {
        let reports = graph
            .steps()
            .map(|s| {
                (
                    s.id.clone(),
                    StepReport {
                        step_id: s.id.clone(),
                        label: s.label.clone(),
                        kind: s.kind(),
                        status: StepStatus::Pending,
                        result: None,
                        transaction: None,
                        failure: None,
                        reused: false,
                        attempts: 0,
                        blocked_by: None,
                        duration_seconds: None,
                    },
                )
            })
            .collect();
        Self {
            values: HashMap::new(),
            transactions: HashMap::new(),
            reports,
            submitted: 0,
        }
    }

    /// Root failure upstream of `id`, if any dependency failed or was blocked.
    fn failed_ancestor(&self, graph: &DeploymentGraph, id: &StepId) -> Option<StepId> {
        graph.dependencies_of(id).iter().find_map(|dep| {
            let report = self.reports.get(dep)?;
            match report.status {
                StepStatus::Failed => Some(dep.clone()),
                StepStatus::Blocked => report.blocked_by.clone().or_else(|| Some(dep.clone())),
                _ => None,
            }
        })
    }

    fn block(&mut self, id: &StepId, blocker: StepId) {
        if let Some(r) = self.reports.get_mut(id) {
            r.status = StepStatus::Blocked;
            r.blocked_by = Some(blocker);
        }
    }

    fn reuse(&mut self, id: &StepId, result: Value, transaction: Option<TransactionRef>) {
        self.values.insert(id.clone(), result.clone());
        if let Some(ref tx) = transaction {
            self.transactions.insert(id.clone(), tx.clone());
        }
        if let Some(r) = self.reports.get_mut(id) {
            r.status = StepStatus::Completed;
            r.result = Some(result);
            r.transaction = transaction;
            r.reused = true;
        }
    }

    /// Step-level failure decided by the engine; nothing is journaled.
    fn fail_before_submit(&mut self, events: &EventSink, id: &StepId, kind: StepErrorKind, message: String) {
        events.emit(ProvenanceEvent::StepFailed {
            module: events.module.clone(),
            step: id.clone(),
            kind,
            error: message.clone(),
        });
        if let Some(r) = self.reports.get_mut(id) {
            r.status = StepStatus::Failed;
            r.failure = Some(StepFailure { kind, message });
        }
    }

    /// True when the loop stopped before every step reached a terminal state.
    fn has_unfinished(&self) -> bool {
        self.reports.values().any(|r| !r.status.is_terminal())
    }

    fn finish(&mut self, id: &StepId, outcome: StepOutcome) {
        if !outcome.status.is_terminal() {
            return;
        }
        if outcome.accepted {
            self.submitted += 1;
        }
        if outcome.status == StepStatus::Completed {
            if let Some(ref v) = outcome.result {
                self.values.insert(id.clone(), v.clone());
            }
            if let Some(ref tx) = outcome.transaction {
                self.transactions.insert(id.clone(), tx.clone());
            }
        }
        if let Some(r) = self.reports.get_mut(id) {
            r.status = outcome.status;
            r.result = outcome.result;
            r.transaction = outcome.transaction;
            r.failure = outcome.failure;
            r.attempts = outcome.attempts;
            r.duration_seconds = Some(outcome.duration.as_secs_f64());
        }
    }

    fn into_report(
        self,
        graph: &DeploymentGraph,
        run_id: String,
        network_id: u64,
        cancelled: bool,
        total_duration: Duration,
    ) -> DeploymentReport {
        let steps: Vec<StepReport> = self.reports.into_values().collect();
        let count = |status: StepStatus| steps.iter().filter(|s| s.status == status).count() as u32;
        let failed = count(StepStatus::Failed);
        let blocked = count(StepStatus::Blocked);
        let reused = steps.iter().filter(|s| s.reused).count() as u32;

        let outcome = if cancelled {
            RunOutcome::Cancelled
        } else if failed + blocked > 0 {
            RunOutcome::PartialFailure
        } else {
            RunOutcome::Success
        };

        let outputs = steps
            .iter()
            .map(|s| {
                let future = match (s.status, &s.result, &s.failure) {
                    (StepStatus::Completed, Some(v), _) => FutureOutcome::Resolved(v.clone()),
                    (StepStatus::Failed, _, Some(f)) => FutureOutcome::Failed {
                        kind: f.kind,
                        message: f.message.clone(),
                    },
                    (StepStatus::Blocked, _, _) => FutureOutcome::Blocked,
                    _ => FutureOutcome::Pending,
                };
                (s.label.clone(), future)
            })
            .collect();

        DeploymentReport {
            module: graph.module_name().to_string(),
            run_id,
            network_id,
            outcome,
            outputs,
            steps,
            submitted: self.submitted,
            reused,
            failed,
            blocked,
            total_duration,
        }
    }
}

// ============================================================================
// Input resolution
// ============================================================================

fn resolve_input(input: &Input, graph: &DeploymentGraph, run: &RunState) -> std::result::Result<Value, String> {
    match input {
        Input::Literal(v) => Ok(v.clone()),
        Input::Parameter { name } => graph
            .parameter(name)
            .cloned()
            .ok_or_else(|| format!("parameter '{}' has no value", name)),
        Input::Future { step, .. } => run
            .values
            .get(step)
            .cloned()
            .ok_or_else(|| format!("future {} is not resolved", step)),
    }
}

fn resolve_address(input: &Input, graph: &DeploymentGraph, run: &RunState) -> std::result::Result<String, String> {
    match resolve_input(input, graph, run)? {
        Value::String(s) => Ok(s),
        other => Err(format!("expected an address string, got {}", other)),
    }
}

fn resolve_all(inputs: &[Input], graph: &DeploymentGraph, run: &RunState) -> std::result::Result<Vec<Value>, String> {
    inputs.iter().map(|i| resolve_input(i, graph, run)).collect()
}

/// Address of the contract whose transaction `producer` sent, when known.
fn emitter_address(producer: &Step, graph: &DeploymentGraph, run: &RunState) -> Option<String> {
    match &producer.operation {
        Operation::CreateContract { .. } => run.values.get(&producer.id)?.as_str().map(String::from),
        Operation::Call { contract, .. } => resolve_address(contract, graph, run).ok(),
        _ => None,
    }
}

/// Turn a step declaration into a fully resolved operation.
fn resolve_operation(step: &Step, graph: &DeploymentGraph, run: &RunState) -> std::result::Result<OperationSpec, String> {
    let overrides = Overrides {
        gas_limit: step.constraints.gas_limit,
        max_fee_per_gas: step.constraints.max_fee_per_gas,
        from: step.constraints.from.clone(),
    };
    let spec = match &step.operation {
        Operation::CreateContract {
            artifact,
            args,
            value,
        } => OperationSpec::Deploy {
            artifact: artifact.clone(),
            args: resolve_all(args, graph, run)?,
            value: value.as_ref().map(|v| resolve_input(v, graph, run)).transpose()?,
            overrides,
        },
        Operation::Call {
            contract,
            function,
            args,
            value,
        } => OperationSpec::Call {
            contract: resolve_address(contract, graph, run)?,
            function: function.clone(),
            args: resolve_all(args, graph, run)?,
            value: value.as_ref().map(|v| resolve_input(v, graph, run)).transpose()?,
            overrides,
        },
        Operation::StaticCall {
            contract,
            function,
            args,
        } => OperationSpec::StaticCall {
            contract: resolve_address(contract, graph, run)?,
            function: function.clone(),
            args: resolve_all(args, graph, run)?,
            from: overrides.from,
        },
        Operation::ReadEvent {
            emitter,
            event,
            argument,
            index,
        } => {
            let source = emitter
                .future_step()
                .ok_or_else(|| "event emitter must be a step future".to_string())?;
            let transaction = run
                .transactions
                .get(source)
                .cloned()
                .ok_or_else(|| format!("no transaction recorded for {}", source))?;
            OperationSpec::ReadEvent {
                transaction,
                emitter: graph
                    .step(source)
                    .and_then(|producer| emitter_address(producer, graph, run)),
                event: event.clone(),
                argument: argument.clone(),
                index: *index,
            }
        }
        Operation::SendValue { to, value, data } => OperationSpec::Send {
            to: resolve_address(to, graph, run)?,
            value: resolve_input(value, graph, run)?,
            data: data.clone(),
            overrides,
        },
    };
    Ok(spec)
}

// ============================================================================
// Step task
// ============================================================================

/// Everything one spawned step needs; owns its handles.
struct StepTask<E: TargetEnvironment, J: Journal> {
    env: Arc<E>,
    journal: Arc<Mutex<J>>,
    config: EngineConfig,
    events: EventSink,
    semaphore: Arc<Semaphore>,
    stop: StopSignal,
    step_id: StepId,
    kind: StepKind,
    fingerprint: String,
    depth: u64,
    spec: OperationSpec,
    resume: Option<TransactionRef>,
}

impl<E: TargetEnvironment, J: Journal + 'static> StepTask<E, J> {
    async fn run(self) -> (StepId, Result<StepOutcome>) {
        let result = self.execute().await;
        (self.step_id, result)
    }

    /// Run a journal write on the blocking pool; file journals fsync every record.
    async fn write_journal<R, F>(&self, write: F) -> Result<R>
    where
        F: FnOnce(&mut J) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let journal = Arc::clone(&self.journal);
        tokio::task::spawn_blocking(move || {
            let mut guard = journal.blocking_lock();
            write(&mut *guard)
        })
        .await
        .map_err(|e| DeployError::Task(e.to_string()))?
    }

    async fn execute(&self) -> Result<StepOutcome> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| DeployError::Task(e.to_string()))?;
        if self.stop.is_set() {
            debug!("run stopping, step not started");
            return Ok(StepOutcome::not_started());
        }
        let started = Instant::now();
        let read_only = self.kind.is_read_only();
        let mut attempts = 0u32;
        let mut accepted = false;

        let transaction = match self.resume.clone() {
            Some(tx) => {
                info!(transaction = %tx, "resuming interrupted submission");
                tx
            }
            None => {
                if !read_only {
                    let (step, fingerprint) = (self.step_id.clone(), self.fingerprint.clone());
                    self.write_journal(move |j| j.mark_pending(&step, &fingerprint))
                        .await?;
                }
                match self.submit_with_retry(&mut attempts).await {
                    Ok(tx) => {
                        accepted = true;
                        if !read_only {
                            let (step, recorded) = (self.step_id.clone(), tx.clone());
                            self.write_journal(move |j| j.record_submission(&step, &recorded))
                                .await?;
                        }
                        self.events.emit(ProvenanceEvent::StepSubmitted {
                            module: self.events.module.clone(),
                            step: self.step_id.clone(),
                            transaction: tx.clone(),
                            attempt: attempts,
                        });
                        debug!(transaction = %tx, attempt = attempts, "submitted");
                        tx
                    }
                    Err(err) => {
                        let message = format!("submission failed after {} attempt(s): {}", attempts, err);
                        return self
                            .fail(StepErrorKind::SubmissionFailed, None, message, attempts, false, started)
                            .await;
                    }
                }
            }
        };

        let depth = if read_only { 0 } else { self.depth };
        let timeout = self.config.confirmation_timeout();
        let confirmed =
            tokio::time::timeout(timeout, self.env.await_confirmation(&transaction, depth)).await;

        let message = match confirmed {
            Ok(Ok(Confirmation::Success { observed })) => {
                let (result, tx) = match self.kind {
                    StepKind::Call | StepKind::SendValue => {
                        (Value::String(transaction.0.clone()), Some(transaction))
                    }
                    StepKind::CreateContract => (observed, Some(transaction)),
                    StepKind::StaticCall | StepKind::ReadEvent => (observed, None),
                };
                let entry = JournalEntry::completed(
                    self.step_id.clone(),
                    self.fingerprint.clone(),
                    result.clone(),
                    tx.clone(),
                );
                self.write_journal(move |j| j.append(entry)).await?;
                let duration = started.elapsed();
                self.events.emit(ProvenanceEvent::StepCompleted {
                    module: self.events.module.clone(),
                    step: self.step_id.clone(),
                    duration_seconds: duration.as_secs_f64(),
                    fingerprint: self.fingerprint.clone(),
                });
                info!(result = %result, "step completed");
                return Ok(StepOutcome {
                    status: StepStatus::Completed,
                    result: Some(result),
                    transaction: tx,
                    failure: None,
                    attempts,
                    duration,
                    accepted,
                });
            }
            Ok(Ok(Confirmation::Reverted { reason })) => format!("reverted: {}", reason),
            Ok(Err(err)) => format!("confirmation failed: {}", err),
            Err(_) => format!("no confirmation within {}s", timeout.as_secs()),
        };
        self.fail(
            StepErrorKind::ConfirmationFailed,
            Some(transaction),
            message,
            attempts,
            accepted,
            started,
        )
        .await
    }

    /// Submit, retrying transient errors with exponential backoff.
    async fn submit_with_retry(&self, attempts: &mut u32) -> std::result::Result<TransactionRef, EnvironmentError> {
        loop {
            *attempts += 1;
            match self.env.submit(&self.spec).await {
                Ok(tx) => return Ok(tx),
                Err(err) if err.is_transient() && *attempts < self.config.max_attempts => {
                    let delay = self.config.backoff_delay(*attempts);
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    warn!(attempt = *attempts, delay_ms, error = %err, "transient submission failure, retrying");
                    self.events.emit(ProvenanceEvent::SubmissionRetried {
                        module: self.events.module.clone(),
                        step: self.step_id.clone(),
                        attempt: *attempts,
                        delay_ms,
                        error: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fail(
        &self,
        kind: StepErrorKind,
        transaction: Option<TransactionRef>,
        message: String,
        attempts: u32,
        accepted: bool,
        started: Instant,
    ) -> Result<StepOutcome> {
        let entry = JournalEntry::failed(
            self.step_id.clone(),
            self.fingerprint.clone(),
            transaction.clone(),
            message.clone(),
        );
        self.write_journal(move |j| j.append(entry)).await?;
        warn!(kind = %kind, error = %message, "step failed");
        self.events.emit(ProvenanceEvent::StepFailed {
            module: self.events.module.clone(),
            step: self.step_id.clone(),
            kind,
            error: message.clone(),
        });
        Ok(StepOutcome {
            status: StepStatus::Failed,
            result: None,
            transaction,
            failure: Some(StepFailure { kind, message }),
            attempts,
            duration: started.elapsed(),
            accepted,
        })
    }
}

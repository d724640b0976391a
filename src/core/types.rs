//! FR-001: Data model — modules, steps, futures, journal records, reports.
//!
//! Everything a deployment run touches is declared here. Journal and event
//! types derive Serialize/Deserialize for JSONL persistence.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Stable step identifier: `{module}#{kind}:{label}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    /// Derive the identifier for a step from its module, kind and label.
    pub fn derive(module: &str, kind: StepKind, label: &str) -> Self {
        Self(format!("{}#{}:{}", module, kind, label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reference to an operation accepted by the target environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionRef(pub String);

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Steps
// ============================================================================

/// The fixed step vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CreateContract,
    Call,
    StaticCall,
    ReadEvent,
    SendValue,
}

impl StepKind {
    /// Declared type of the future this kind of step produces.
    pub fn output_type(self) -> ValueType {
        match self {
            Self::CreateContract => ValueType::Address,
            Self::Call | Self::SendValue => ValueType::Transaction,
            Self::StaticCall | Self::ReadEvent => ValueType::Data,
        }
    }

    /// Read-only steps have no effect on the target environment.
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::StaticCall | Self::ReadEvent)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateContract => write!(f, "deploy"),
            Self::Call => write!(f, "call"),
            Self::StaticCall => write!(f, "static_call"),
            Self::ReadEvent => write!(f, "read_event"),
            Self::SendValue => write!(f, "send"),
        }
    }
}

/// Declared value types for futures and input slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Address,
    Transaction,
    Data,
    Number,
    Any,
}

impl ValueType {
    /// Whether a slot of this type accepts a future producing `produced`.
    /// Untyped `Data` reads may feed address and number slots.
    pub fn accepts(self, produced: ValueType) -> bool {
        match self {
            Self::Any => true,
            Self::Address | Self::Number => produced == self || produced == ValueType::Data,
            _ => produced == self,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address => write!(f, "address"),
            Self::Transaction => write!(f, "transaction"),
            Self::Data => write!(f, "data"),
            Self::Number => write!(f, "number"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// A step input: a literal, a module parameter, or another step's future.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Input {
    Literal(Value),
    Parameter { name: String },
    Future { step: StepId, expects: ValueType },
}

impl Input {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Reference another step's future without a type expectation.
    pub fn future(step: impl Into<StepId>) -> Self {
        Self::Future {
            step: step.into(),
            expects: ValueType::Any,
        }
    }

    /// Narrow the expected type of a future reference. Literals and
    /// parameters are returned unchanged.
    pub fn expecting(self, ty: ValueType) -> Self {
        match self {
            Self::Future { step, .. } => Self::Future { step, expects: ty },
            other => other,
        }
    }

    /// The producing step, if this input is a future reference.
    pub fn future_step(&self) -> Option<&StepId> {
        match self {
            Self::Future { step, .. } => Some(step),
            _ => None,
        }
    }
}

impl From<String> for StepId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Per-step execution constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConstraints {
    /// Confirmation depth; falls back to the engine default
    #[serde(default)]
    pub confirmations: Option<u64>,

    #[serde(default)]
    pub gas_limit: Option<u64>,

    #[serde(default)]
    pub max_fee_per_gas: Option<u128>,

    /// Sender account
    #[serde(default)]
    pub from: Option<String>,
}

/// The operation a step performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    CreateContract {
        artifact: String,
        args: Vec<Input>,
        value: Option<Input>,
    },
    Call {
        contract: Input,
        function: String,
        args: Vec<Input>,
        value: Option<Input>,
    },
    StaticCall {
        contract: Input,
        function: String,
        args: Vec<Input>,
    },
    ReadEvent {
        emitter: Input,
        event: String,
        argument: String,
        index: usize,
    },
    SendValue {
        to: Input,
        value: Input,
        data: Option<String>,
    },
}

impl Operation {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::CreateContract { .. } => StepKind::CreateContract,
            Self::Call { .. } => StepKind::Call,
            Self::StaticCall { .. } => StepKind::StaticCall,
            Self::ReadEvent { .. } => StepKind::ReadEvent,
            Self::SendValue { .. } => StepKind::SendValue,
        }
    }

    /// All inputs in declaration order.
    pub fn inputs(&self) -> Vec<&Input> {
        match self {
            Self::CreateContract { args, value, .. } => args.iter().chain(value.iter()).collect(),
            Self::Call {
                contract,
                args,
                value,
                ..
            } => std::iter::once(contract)
                .chain(args.iter())
                .chain(value.iter())
                .collect(),
            Self::StaticCall { contract, args, .. } => {
                std::iter::once(contract).chain(args.iter()).collect()
            }
            Self::ReadEvent { emitter, .. } => vec![emitter],
            Self::SendValue { to, value, .. } => vec![to, value],
        }
    }
}

/// A single declared unit of deployment work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,

    /// User-given label; also the future's output key
    pub label: String,

    pub operation: Operation,

    /// Ordering-only dependencies
    #[serde(default)]
    pub after: Vec<StepId>,

    #[serde(default)]
    pub constraints: StepConstraints,
}

impl Step {
    pub fn new(module: &str, label: &str, operation: Operation) -> Self {
        Self {
            id: StepId::derive(module, operation.kind(), label),
            label: label.to_string(),
            operation,
            after: Vec::new(),
            constraints: StepConstraints::default(),
        }
    }

    pub fn kind(&self) -> StepKind {
        self.operation.kind()
    }

    /// Producing steps this step waits on, deduplicated, inputs first.
    pub fn dependencies(&self) -> Vec<&StepId> {
        let mut deps: Vec<&StepId> = Vec::new();
        let referenced = self
            .operation
            .inputs()
            .into_iter()
            .filter_map(Input::future_step)
            .chain(self.after.iter());
        for id in referenced {
            if !deps.contains(&id) {
                deps.push(id);
            }
        }
        deps
    }
}

// ============================================================================
// Modules and parameters
// ============================================================================

/// A declared module parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleParameter {
    pub name: String,
    #[serde(default)]
    pub default: Option<Value>,
}

/// A named, immutable set of step declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub parameters: IndexMap<String, ModuleParameter>,
    pub steps: Vec<Step>,
}

/// Run-time parameter values, keyed by module name then parameter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentParameters(IndexMap<String, IndexMap<String, Value>>);

impl DeploymentParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, module: &str, name: &str, value: impl Into<Value>) -> &mut Self {
        self.0
            .entry(module.to_string())
            .or_default()
            .insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, module: &str, name: &str) -> Option<&Value> {
        self.0.get(module).and_then(|m| m.get(name))
    }

    pub fn for_module(&self, module: &str) -> Option<&IndexMap<String, Value>> {
        self.0.get(module)
    }
}

// ============================================================================
// Batches
// ============================================================================

/// A set of mutually independent steps, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionBatch {
    pub index: usize,
    pub steps: Vec<StepId>,
}

// ============================================================================
// Journal records
// ============================================================================

/// Terminal status recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    Completed,
    Failed,
}

/// Persisted outcome of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub step_id: StepId,
    pub status: JournalStatus,

    #[serde(default)]
    pub result: Option<Value>,

    #[serde(default)]
    pub transaction: Option<TransactionRef>,

    /// BLAKE3 fingerprint of the step declaration that produced this entry
    pub fingerprint: String,

    #[serde(default)]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl JournalEntry {
    pub fn completed(
        step_id: StepId,
        fingerprint: String,
        result: Value,
        transaction: Option<TransactionRef>,
    ) -> Self {
        Self {
            step_id,
            status: JournalStatus::Completed,
            result: Some(result),
            transaction,
            fingerprint,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        step_id: StepId,
        fingerprint: String,
        transaction: Option<TransactionRef>,
        error: String,
    ) -> Self {
        Self {
            step_id,
            status: JournalStatus::Failed,
            result: None,
            transaction,
            fingerprint,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }
}

/// Written before an effectful submission; cleared by the terminal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMarker {
    pub step_id: StepId,
    pub fingerprint: String,

    /// Set once the environment accepted the operation
    #[serde(default)]
    pub transaction: Option<TransactionRef>,

    pub marked_at: DateTime<Utc>,
}

// ============================================================================
// Reconciliation
// ============================================================================

/// What the engine will do with a step, given the journal.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    /// Completed earlier with the same declaration
    Reuse {
        result: Value,
        transaction: Option<TransactionRef>,
    },
    /// Submitted earlier but never recorded; await the known transaction
    Resume { transaction: TransactionRef },
    /// Failed earlier with the same declaration
    Retry,
    /// No journal history
    Execute,
    /// Declaration changed since the journaled attempt
    Stale { reason: String },
    /// Marked pending with no transaction reference
    Indeterminate,
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reuse { .. } => write!(f, "REUSE"),
            Self::Resume { .. } => write!(f, "RESUME"),
            Self::Retry => write!(f, "RETRY"),
            Self::Execute => write!(f, "EXECUTE"),
            Self::Stale { .. } => write!(f, "STALE"),
            Self::Indeterminate => write!(f, "INDETERMINATE"),
        }
    }
}

/// Reconciled view of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledStep {
    pub step_id: StepId,
    pub fingerprint: String,
    pub action: ReconcileAction,
}

/// Result of replaying the journal against a graph.
#[derive(Debug, Clone)]
pub struct ReconciliationPlan {
    pub module: String,

    /// Per-step actions in declaration order
    pub steps: IndexMap<StepId, ReconciledStep>,

    /// Journaled step ids that no longer exist in the module
    pub orphans: Vec<StepId>,

    pub to_execute: u32,
    pub to_retry: u32,
    pub to_resume: u32,
    pub reused: u32,
    pub stale: u32,
    pub indeterminate: u32,
}

// ============================================================================
// Run reporting
// ============================================================================

/// Reported step status. The in-flight "submitted" state lives in the
/// journal as a pending marker carrying a transaction; blocked is reachable
/// only from pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    Blocked,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Blocked)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// Classification of a step-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    StaleStep,
    SubmissionFailed,
    ConfirmationFailed,
    InputResolution,
    IndeterminateSubmission,
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleStep => write!(f, "stale_step"),
            Self::SubmissionFailed => write!(f, "submission_failed"),
            Self::ConfirmationFailed => write!(f, "confirmation_failed"),
            Self::InputResolution => write!(f, "input_resolution"),
            Self::IndeterminateSubmission => write!(f, "indeterminate_submission"),
        }
    }
}

/// Captured step failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: StepErrorKind,
    pub message: String,
}

/// Terminal report for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step_id: StepId,
    pub label: String,
    pub kind: StepKind,
    pub status: StepStatus,
    pub result: Option<Value>,
    pub transaction: Option<TransactionRef>,
    pub failure: Option<StepFailure>,

    /// Resolved from the journal without touching the environment
    pub reused: bool,

    /// Submission attempts made in this run
    pub attempts: u32,

    /// Ancestor whose failure blocked this step
    pub blocked_by: Option<StepId>,

    pub duration_seconds: Option<f64>,
}

/// Final state of a declared future, keyed by label in the report.
#[derive(Debug, Clone, PartialEq)]
pub enum FutureOutcome {
    Resolved(Value),
    Failed { kind: StepErrorKind, message: String },
    Blocked,
    Pending,
}

impl FutureOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Resolved(v) => Some(v),
            _ => None,
        }
    }
}

/// Overall run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    PartialFailure,
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::PartialFailure => write!(f, "PARTIAL_FAILURE"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Result of one deployment run.
#[derive(Debug, Clone)]
pub struct DeploymentReport {
    pub module: String,
    pub run_id: String,
    pub network_id: u64,
    pub outcome: RunOutcome,

    /// Future label → outcome, in declaration order
    pub outputs: IndexMap<String, FutureOutcome>,

    pub steps: Vec<StepReport>,

    /// Steps whose operation the environment accepted during this run
    pub submitted: u32,
    pub reused: u32,
    pub failed: u32,
    pub blocked: u32,
    pub total_duration: std::time::Duration,
}

impl DeploymentReport {
    pub fn step(&self, id: &StepId) -> Option<&StepReport> {
        self.steps.iter().find(|s| &s.step_id == id)
    }

    /// Resolved values only, keyed by label.
    pub fn resolved_values(&self) -> IndexMap<String, Value> {
        self.outputs
            .iter()
            .filter_map(|(label, o)| o.value().map(|v| (label.clone(), v.clone())))
            .collect()
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    RunStarted {
        module: String,
        run_id: String,
        network_id: u64,
        fragua_version: String,
    },
    StepStarted {
        module: String,
        step: StepId,
        action: String,
    },
    StepSubmitted {
        module: String,
        step: StepId,
        transaction: TransactionRef,
        attempt: u32,
    },
    SubmissionRetried {
        module: String,
        step: StepId,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    StepCompleted {
        module: String,
        step: StepId,
        duration_seconds: f64,
        fingerprint: String,
    },
    StepReused {
        module: String,
        step: StepId,
    },
    StepFailed {
        module: String,
        step: StepId,
        kind: StepErrorKind,
        error: String,
    },
    StepBlocked {
        module: String,
        step: StepId,
        blocked_by: StepId,
    },
    RunCompleted {
        module: String,
        run_id: String,
        outcome: RunOutcome,
        steps_submitted: u32,
        steps_reused: u32,
        steps_failed: u32,
        steps_blocked: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Tests
// ============================================================================

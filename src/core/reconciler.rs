//! FR-004: Reconciler — replay the journal against the current graph.
//!
//! Each step's declaration is fingerprinted and compared to what the journal
//! recorded. Completed work is reused, failed work is retried, submissions
//! interrupted by a crash are resumed, and anything whose declaration changed
//! since it was journaled is flagged stale instead of re-executed.

use super::error::{DeployError, Result};
use super::graph::DeploymentGraph;
use super::journal::Journal;
use super::types::*;
use crate::tripwire::hasher;
use indexmap::IndexMap;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Fingerprint of a step declaration with parameters resolved.
///
/// Covers kind, label, operation fields, resolved inputs, `after` edges and
/// the sender. Confirmation depth and fee overrides are excluded: changing
/// them does not change what the step does.
pub fn fingerprint_step(step: &Step, graph: &DeploymentGraph) -> String {
    let input = |i: &Input| render_input(i, graph);
    let operation = match &step.operation {
        Operation::CreateContract {
            artifact,
            args,
            value,
        } => json!({
            "artifact": artifact,
            "args": args.iter().map(input).collect::<Vec<_>>(),
            "value": value.as_ref().map(input),
        }),
        Operation::Call {
            contract,
            function,
            args,
            value,
        } => json!({
            "contract": input(contract),
            "function": function,
            "args": args.iter().map(input).collect::<Vec<_>>(),
            "value": value.as_ref().map(input),
        }),
        Operation::StaticCall {
            contract,
            function,
            args,
        } => json!({
            "contract": input(contract),
            "function": function,
            "args": args.iter().map(input).collect::<Vec<_>>(),
        }),
        Operation::ReadEvent {
            emitter,
            event,
            argument,
            index,
        } => json!({
            "emitter": input(emitter),
            "event": event,
            "argument": argument,
            "index": index,
        }),
        Operation::SendValue { to, value, data } => json!({
            "to": input(to),
            "value": input(value),
            "data": data,
        }),
    };

    let declaration = json!({
        "kind": step.kind().to_string(),
        "label": step.label,
        "operation": operation,
        "after": step.after.iter().map(StepId::as_str).collect::<Vec<_>>(),
        "from": step.constraints.from,
    });
    hasher::hash_json(&declaration)
}

fn render_input(input: &Input, graph: &DeploymentGraph) -> Value {
    match input {
        Input::Literal(v) => json!({ "literal": v }),
        Input::Parameter { name } => json!({
            "parameter": name,
            "value": graph.parameter(name),
        }),
        Input::Future { step, .. } => json!({ "future": step.as_str() }),
    }
}

/// Classify every step in the graph against the journal.
pub fn reconcile<J: Journal + ?Sized>(graph: &DeploymentGraph, journal: &J) -> ReconciliationPlan {
    let mut steps: IndexMap<StepId, ReconciledStep> = IndexMap::new();
    let mut plan = ReconciliationPlan {
        module: graph.module_name().to_string(),
        steps: IndexMap::new(),
        orphans: Vec::new(),
        to_execute: 0,
        to_retry: 0,
        to_resume: 0,
        reused: 0,
        stale: 0,
        indeterminate: 0,
    };

    for step in graph.steps() {
        let fingerprint = fingerprint_step(step, graph);
        let action = determine_action(&step.id, &fingerprint, journal);
        debug!(step = %step.id, action = %action, "reconciled");

        match action {
            ReconcileAction::Reuse { .. } => plan.reused += 1,
            ReconcileAction::Resume { .. } => plan.to_resume += 1,
            ReconcileAction::Retry => plan.to_retry += 1,
            ReconcileAction::Execute => plan.to_execute += 1,
            ReconcileAction::Stale { .. } => plan.stale += 1,
            ReconcileAction::Indeterminate => plan.indeterminate += 1,
        }

        steps.insert(
            step.id.clone(),
            ReconciledStep {
                step_id: step.id.clone(),
                fingerprint,
                action,
            },
        );
    }

    let journaled = journal
        .list_all()
        .into_iter()
        .map(|e| e.step_id)
        .chain(journal.list_pending().into_iter().map(|m| m.step_id));
    for id in journaled {
        if graph.step(&id).is_none() && !plan.orphans.contains(&id) {
            warn!(module = %plan.module, step = %id, "journal entry has no matching step");
            plan.orphans.push(id);
        }
    }

    plan.steps = steps;
    plan
}

fn determine_action<J: Journal + ?Sized>(
    id: &StepId,
    fingerprint: &str,
    journal: &J,
) -> ReconcileAction {
    let entry = journal.get(id);

    // Completed history wins over everything else
    if let Some(ref e) = entry {
        if e.status == JournalStatus::Completed {
            if e.fingerprint == fingerprint {
                return ReconcileAction::Reuse {
                    result: e.result.clone().unwrap_or(Value::Null),
                    transaction: e.transaction.clone(),
                };
            }
            return ReconcileAction::Stale {
                reason: "declaration changed since the step completed".to_string(),
            };
        }
    }

    if let Some(marker) = journal.pending(id) {
        if marker.fingerprint != fingerprint {
            return ReconcileAction::Stale {
                reason: "declaration changed since the interrupted submission".to_string(),
            };
        }
        return match marker.transaction {
            Some(transaction) => ReconcileAction::Resume { transaction },
            None => ReconcileAction::Indeterminate,
        };
    }

    match entry {
        Some(e) if e.fingerprint == fingerprint => ReconcileAction::Retry,
        Some(_) => ReconcileAction::Stale {
            reason: "declaration changed since the failed attempt".to_string(),
        },
        None => ReconcileAction::Execute,
    }
}

impl ReconciliationPlan {
    pub fn action(&self, id: &StepId) -> Option<&ReconcileAction> {
        self.steps.get(id).map(|s| &s.action)
    }

    pub fn fingerprint(&self, id: &StepId) -> Option<&str> {
        self.steps.get(id).map(|s| s.fingerprint.as_str())
    }

    /// One [`DeployError::StaleStep`] per stale step, in declaration order.
    pub fn stale_errors(&self) -> Vec<DeployError> {
        self.steps
            .values()
            .filter_map(|s| match &s.action {
                ReconcileAction::Stale { reason } => Some(DeployError::StaleStep {
                    step: s.step_id.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Fail with the first stale step, if any.
    pub fn ensure_fresh(&self) -> Result<()> {
        match self.stale_errors().into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Steps that will touch the target environment.
    pub fn pending_work(&self) -> u32 {
        self.to_execute + self.to_retry + self.to_resume
    }
}

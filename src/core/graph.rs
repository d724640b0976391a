//! FR-002: Graph builder — validate a module into an immutable step arena.
//!
//! The graph owns every step keyed by id in declaration order, the resolved
//! parameter values, and forward/backward edge lists. All validation problems
//! are collected and reported together.

use super::error::{DeployError, Result};
use super::types::*;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// Validated, immutable deployment DAG.
#[derive(Debug, Clone)]
pub struct DeploymentGraph {
    module: String,
    steps: IndexMap<StepId, Step>,
    parameters: IndexMap<String, Value>,
    dependencies: IndexMap<StepId, Vec<StepId>>,
    dependents: IndexMap<StepId, Vec<StepId>>,
}

impl DeploymentGraph {
    pub fn module_name(&self) -> &str {
        &self.module
    }

    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.get(id)
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &StepId> {
        self.steps.keys()
    }

    pub fn dependencies_of(&self, id: &StepId) -> &[StepId] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents_of(&self, id: &StepId) -> &[StepId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Position of a step in the module declaration.
    pub fn declaration_index(&self, id: &StepId) -> Option<usize> {
        self.steps.get_index_of(id)
    }

    /// Resolved value of a module parameter (supplied or default).
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> &IndexMap<String, Value> {
        &self.parameters
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Transitive dependents of a step, in declaration order.
    pub fn descendants(&self, id: &StepId) -> Vec<StepId> {
        let mut seen: HashSet<&StepId> = HashSet::new();
        let mut stack: Vec<&StepId> = self.dependents_of(id).iter().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.dependents_of(next));
            }
        }
        self.steps.keys().filter(|k| seen.contains(k)).cloned().collect()
    }
}

/// Validate a module against run-time parameters and build its graph.
pub fn build_graph(module: &Module, params: &DeploymentParameters) -> Result<DeploymentGraph> {
    let mut errors: Vec<String> = Vec::new();

    if module.name.trim().is_empty() {
        errors.push("module name must not be empty".to_string());
    }

    let mut steps: IndexMap<StepId, Step> = IndexMap::new();
    let mut labels: HashSet<&str> = HashSet::new();
    for step in &module.steps {
        if step.label.trim().is_empty() {
            errors.push(format!("step {} has an empty label", step.id));
        }
        if steps.contains_key(&step.id) {
            errors.push(format!("duplicate step id: {}", step.id));
            continue;
        }
        if !labels.insert(step.label.as_str()) {
            errors.push(format!(
                "duplicate future label '{}' ({})",
                step.label, step.id
            ));
        }
        steps.insert(step.id.clone(), step.clone());
    }

    let supplied = params.for_module(&module.name);
    let mut parameters: IndexMap<String, Value> = IndexMap::new();
    for (name, declared) in &module.parameters {
        if let Some(v) = supplied.and_then(|s| s.get(name)).or(declared.default.as_ref()) {
            parameters.insert(name.clone(), v.clone());
        }
    }
    if let Some(supplied) = supplied {
        for name in supplied.keys() {
            if !module.parameters.contains_key(name) {
                warn!(module = %module.name, parameter = %name, "supplied parameter is not declared");
            }
        }
    }

    for step in steps.values() {
        validate_step(step, &steps, module, &parameters, &mut errors);
    }

    if !errors.is_empty() {
        return Err(DeployError::Validation { errors });
    }

    let mut dependencies: IndexMap<StepId, Vec<StepId>> = IndexMap::new();
    let mut dependents: IndexMap<StepId, Vec<StepId>> =
        steps.keys().map(|id| (id.clone(), Vec::new())).collect();
    for (id, step) in &steps {
        let deps: Vec<StepId> = step.dependencies().into_iter().cloned().collect();
        for dep in &deps {
            if let Some(list) = dependents.get_mut(dep) {
                list.push(id.clone());
            }
        }
        dependencies.insert(id.clone(), deps);
    }

    Ok(DeploymentGraph {
        module: module.name.clone(),
        steps,
        parameters,
        dependencies,
        dependents,
    })
}

fn validate_step(
    step: &Step,
    steps: &IndexMap<StepId, Step>,
    module: &Module,
    parameters: &IndexMap<String, Value>,
    errors: &mut Vec<String>,
) {
    for input in step.operation.inputs() {
        match input {
            Input::Literal(_) => {}
            Input::Parameter { name } => {
                if !module.parameters.contains_key(name) {
                    errors.push(format!("step {} references unknown parameter '{}'", step.id, name));
                } else if !parameters.contains_key(name) {
                    errors.push(format!(
                        "parameter '{}' used by {} has no default and no supplied value",
                        name, step.id
                    ));
                }
            }
            Input::Future { step: producer, expects } => {
                if producer == &step.id {
                    errors.push(format!("step {} depends on itself", step.id));
                    continue;
                }
                let Some(source) = steps.get(producer) else {
                    errors.push(format!("step {} references unknown future {}", step.id, producer));
                    continue;
                };
                let produced = source.kind().output_type();
                if !expects.accepts(produced) {
                    errors.push(format!(
                        "step {} expects {} but {} produces {}",
                        step.id, expects, producer, produced
                    ));
                }
            }
        }
    }

    for after in &step.after {
        if after == &step.id {
            errors.push(format!("step {} depends on itself", step.id));
        } else if !steps.contains_key(after) {
            errors.push(format!("step {} is ordered after unknown step {}", step.id, after));
        }
    }

    if let Operation::ReadEvent { emitter, .. } = &step.operation {
        match emitter.future_step().and_then(|id| steps.get(id)) {
            Some(source) if source.kind().is_read_only() => errors.push(format!(
                "step {} reads events from {}, which sends no transaction",
                step.id, source.id
            )),
            Some(_) => {}
            None if emitter.future_step().is_none() => errors.push(format!(
                "step {} must read events from another step's future",
                step.id
            )),
            None => {}
        }
    }
}

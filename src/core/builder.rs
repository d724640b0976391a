//! FR-005: Module builder — explicit declaration context.
//!
//! Each declaration returns a [`FutureRef`] handle that later declarations
//! consume as input. The builder performs no validation; that happens when
//! the finished [`Module`] is turned into a graph.

use super::types::*;
use indexmap::IndexMap;
use serde_json::Value;

/// Handle to a declared step's future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutureRef {
    step: StepId,
    label: String,
    output: ValueType,
}

impl FutureRef {
    pub fn id(&self) -> &StepId {
        &self.step
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn output_type(&self) -> ValueType {
        self.output
    }
}

impl From<&FutureRef> for Input {
    fn from(f: &FutureRef) -> Self {
        Input::future(f.step.clone())
    }
}

/// Handle to a declared module parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRef {
    name: String,
}

impl ParameterRef {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<&ParameterRef> for Input {
    fn from(p: &ParameterRef) -> Self {
        Input::Parameter {
            name: p.name.clone(),
        }
    }
}

/// Optional per-step settings.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Overrides the derived label
    pub label: Option<String>,
    pub after: Vec<FutureRef>,
    /// Native value attached to a deploy or call
    pub value: Option<Input>,
    pub constraints: StepConstraints,
}

impl StepOptions {
    pub fn labeled(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            ..Self::default()
        }
    }

    pub fn after(mut self, future: &FutureRef) -> Self {
        self.after.push(future.clone());
        self
    }

    pub fn value(mut self, value: impl Into<Input>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn constraints(mut self, constraints: StepConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Declaration context for one module.
#[derive(Debug)]
pub struct ModuleBuilder {
    name: String,
    parameters: IndexMap<String, ModuleParameter>,
    steps: Vec<Step>,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: IndexMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a module parameter.
    pub fn parameter(&mut self, name: &str, default: Option<Value>) -> ParameterRef {
        self.parameters.insert(
            name.to_string(),
            ModuleParameter {
                name: name.to_string(),
                default,
            },
        );
        ParameterRef {
            name: name.to_string(),
        }
    }

    /// Deploy a contract artifact. The label defaults to the artifact name.
    pub fn contract(&mut self, artifact: &str, args: Vec<Input>) -> FutureRef {
        self.contract_with(artifact, args, StepOptions::default())
    }

    pub fn contract_with(&mut self, artifact: &str, args: Vec<Input>, opts: StepOptions) -> FutureRef {
        let label = opts.label.clone().unwrap_or_else(|| artifact.to_string());
        let value = opts.value.clone().map(|v| v.expecting(ValueType::Number));
        self.push(
            &label,
            Operation::CreateContract {
                artifact: artifact.to_string(),
                args,
                value,
            },
            opts,
        )
    }

    /// Call a function on a deployed contract. Label: `{contract}.{function}`.
    pub fn call(&mut self, contract: &FutureRef, function: &str, args: Vec<Input>) -> FutureRef {
        self.call_with(contract, function, args, StepOptions::default())
    }

    pub fn call_with(
        &mut self,
        contract: &FutureRef,
        function: &str,
        args: Vec<Input>,
        opts: StepOptions,
    ) -> FutureRef {
        let label = opts
            .label
            .clone()
            .unwrap_or_else(|| format!("{}.{}", contract.label, function));
        let value = opts.value.clone().map(|v| v.expecting(ValueType::Number));
        self.push(
            &label,
            Operation::Call {
                contract: Input::from(contract).expecting(ValueType::Address),
                function: function.to_string(),
                args,
                value,
            },
            opts,
        )
    }

    /// Read-only call. Label: `{contract}.{function}`.
    pub fn static_call(&mut self, contract: &FutureRef, function: &str, args: Vec<Input>) -> FutureRef {
        self.static_call_with(contract, function, args, StepOptions::default())
    }

    pub fn static_call_with(
        &mut self,
        contract: &FutureRef,
        function: &str,
        args: Vec<Input>,
        opts: StepOptions,
    ) -> FutureRef {
        let label = opts
            .label
            .clone()
            .unwrap_or_else(|| format!("{}.{}", contract.label, function));
        self.push(
            &label,
            Operation::StaticCall {
                contract: Input::from(contract).expecting(ValueType::Address),
                function: function.to_string(),
                args,
            },
            opts,
        )
    }

    /// Read the first matching event argument emitted by another step's
    /// transaction. Label: `{emitter}.{event}.{argument}.{index}`.
    pub fn read_event_argument(&mut self, emitter: &FutureRef, event: &str, argument: &str) -> FutureRef {
        self.read_event_argument_with(emitter, event, argument, 0, StepOptions::default())
    }

    pub fn read_event_argument_with(
        &mut self,
        emitter: &FutureRef,
        event: &str,
        argument: &str,
        index: usize,
        opts: StepOptions,
    ) -> FutureRef {
        let label = opts
            .label
            .clone()
            .unwrap_or_else(|| format!("{}.{}.{}.{}", emitter.label, event, argument, index));
        self.push(
            &label,
            Operation::ReadEvent {
                emitter: Input::from(emitter),
                event: event.to_string(),
                argument: argument.to_string(),
                index,
            },
            opts,
        )
    }

    /// Send native value to an address.
    pub fn send(&mut self, label: &str, to: impl Into<Input>, value: impl Into<Input>) -> FutureRef {
        self.send_with(label, to, value, None, StepOptions::default())
    }

    pub fn send_with(
        &mut self,
        label: &str,
        to: impl Into<Input>,
        value: impl Into<Input>,
        data: Option<String>,
        opts: StepOptions,
    ) -> FutureRef {
        self.push(
            label,
            Operation::SendValue {
                to: to.into().expecting(ValueType::Address),
                value: value.into().expecting(ValueType::Number),
                data,
            },
            opts,
        )
    }

    fn push(&mut self, label: &str, operation: Operation, opts: StepOptions) -> FutureRef {
        let mut step = Step::new(&self.name, label, operation);
        step.after = opts.after.iter().map(|f| f.step.clone()).collect();
        step.constraints = opts.constraints;
        let handle = FutureRef {
            step: step.id.clone(),
            label: step.label.clone(),
            output: step.kind().output_type(),
        };
        self.steps.push(step);
        handle
    }

    /// Finish the declaration.
    pub fn build(self) -> Module {
        Module {
            name: self.name,
            parameters: self.parameters,
            steps: self.steps,
        }
    }
}

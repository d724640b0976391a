//! Fragua — declarative deployment-graph engine.
//!
//! Modules declare steps (deploy, call, static call, event read, send) whose
//! outputs are futures consumed by later steps. The engine validates the
//! module into a DAG, batches it topologically, and executes each batch
//! against a target environment. Every outcome is journaled with a BLAKE3
//! fingerprint so re-runs reuse completed work and resume interrupted
//! submissions instead of repeating them.

pub mod core;
pub mod environment;
pub mod tripwire;

pub use crate::core::builder::{FutureRef, ModuleBuilder, ParameterRef, StepOptions};
pub use crate::core::config::EngineConfig;
pub use crate::core::error::{DeployError, Result};
pub use crate::core::executor::{CancelHandle, Engine};
pub use crate::core::journal::{FileJournal, Journal, MemoryJournal};
pub use crate::core::types::{DeploymentParameters, DeploymentReport, Input, Module, RunOutcome};
pub use crate::environment::{SimulatedEnvironment, TargetEnvironment};

//! FR-018: Error taxonomy.
//!
//! Run-level failures are [`DeployError`] and abort the run. Step-level
//! failures are recorded in the report as [`StepErrorKind`](super::types::StepErrorKind)
//! and never raised.

use super::types::StepId;
use crate::environment::EnvironmentError;
use thiserror::Error;

/// Run-level error.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Malformed module; the run never starts.
    #[error("module validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    /// Dependency cycle; the run never starts.
    #[error("dependency cycle detected: {}", format_cycle(.cycle))]
    Cycle { cycle: Vec<StepId> },

    /// Journal inconsistency or network mismatch.
    #[error("journal conflict on {step}: {message}")]
    Conflict { step: String, message: String },

    /// Declared inputs changed since a journaled attempt.
    #[error("step {step} is stale: {reason}")]
    StaleStep { step: StepId, reason: String },

    /// Journal storage failure (I/O, corrupt record).
    #[error("journal error: {0}")]
    Journal(String),

    #[error("invalid engine configuration: {0}")]
    Config(String),

    #[error("target environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// A step task ended without reporting (panic or abort).
    #[error("step task failed: {0}")]
    Task(String),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, DeployError>;

fn format_cycle(cycle: &[StepId]) -> String {
    let mut parts: Vec<&str> = cycle.iter().map(StepId::as_str).collect();
    if let Some(first) = parts.first().copied() {
        parts.push(first);
    }
    parts.join(" -> ")
}

impl DeployError {
    pub fn conflict(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            step: step.into(),
            message: message.into(),
        }
    }
}

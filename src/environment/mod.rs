//! FR-010: Target environment abstraction.
//!
//! The engine never constructs a network client. It consumes this capability
//! and submits fully resolved operations through it.

pub mod simulated;

use crate::core::types::TransactionRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use simulated::SimulatedEnvironment;

/// Fee and sender overrides carried from step constraints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<u128>,
    pub from: Option<String>,
}

/// A fully resolved operation ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationSpec {
    Deploy {
        artifact: String,
        args: Vec<Value>,
        value: Option<Value>,
        overrides: Overrides,
    },
    Call {
        contract: String,
        function: String,
        args: Vec<Value>,
        value: Option<Value>,
        overrides: Overrides,
    },
    StaticCall {
        contract: String,
        function: String,
        args: Vec<Value>,
        from: Option<String>,
    },
    ReadEvent {
        transaction: TransactionRef,
        emitter: Option<String>,
        event: String,
        argument: String,
        index: usize,
    },
    Send {
        to: String,
        value: Value,
        data: Option<String>,
        overrides: Overrides,
    },
}

impl OperationSpec {
    /// Short name used in logs: artifact, function or event.
    pub fn subject(&self) -> &str {
        match self {
            Self::Deploy { artifact, .. } => artifact,
            Self::Call { function, .. } | Self::StaticCall { function, .. } => function,
            Self::ReadEvent { event, .. } => event,
            Self::Send { to, .. } => to,
        }
    }
}

/// Observed outcome of a submitted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    Success { observed: Value },
    Reverted { reason: String },
}

/// Errors reported by the target environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvironmentError {
    /// Network hiccup, nonce collision; safe to resubmit
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// The environment refused the operation outright
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unknown transaction: {0}")]
    NotFound(String),
}

impl EnvironmentError {
    /// Whether a submission failing with this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Capability the engine drives: submit, confirm, identify the network.
#[async_trait]
pub trait TargetEnvironment: Send + Sync {
    /// Send an operation; returns its reference once accepted.
    async fn submit(&self, op: &OperationSpec) -> Result<TransactionRef, EnvironmentError>;

    /// Wait until the operation is `depth` confirmations deep.
    async fn await_confirmation(
        &self,
        tx: &TransactionRef,
        depth: u64,
    ) -> Result<Confirmation, EnvironmentError>;

    async fn current_network_id(&self) -> Result<u64, EnvironmentError>;
}

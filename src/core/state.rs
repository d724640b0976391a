//! FR-013: Deployed lock snapshot — load, save (atomic), path derivation.
//!
//! The journal is the source of truth; the lock is a human-readable summary
//! of every resolved future, rewritten after each run.

use super::error::{DeployError, Result};
use super::types::{DeploymentReport, StepId, StepKind, StepStatus, TransactionRef};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Snapshot of resolved futures for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentLock {
    pub schema: String,
    pub module: String,
    pub network_id: u64,
    pub generated_at: String,
    pub generator: String,

    /// Future label → locked value, in declaration order
    pub futures: IndexMap<String, LockedFuture>,
}

/// A resolved future as recorded in the lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedFuture {
    pub step_id: StepId,
    pub kind: StepKind,
    pub value: Value,
    #[serde(default)]
    pub transaction: Option<TransactionRef>,
}

/// Derive the lock file path for a module within the state directory.
pub fn lock_file_path(state_dir: &Path, module: &str) -> PathBuf {
    state_dir.join(module).join("deployed.lock.yaml")
}

/// Load a lock file for a module. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, module: &str) -> Result<Option<DeploymentLock>> {
    let path = lock_file_path(state_dir, module);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| DeployError::Journal(format!("cannot read {}: {}", path.display(), e)))?;
    let lock: DeploymentLock = serde_yaml_ng::from_str(&content).map_err(|e| {
        DeployError::Journal(format!("invalid lock file {}: {}", path.display(), e))
    })?;
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &DeploymentLock) -> Result<()> {
    let path = lock_file_path(state_dir, &lock.module);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            DeployError::Journal(format!("cannot create dir {}: {}", parent.display(), e))
        })?;
    }

    let yaml = serde_yaml_ng::to_string(lock)
        .map_err(|e| DeployError::Journal(format!("serialize error: {}", e)))?;

    // Atomic write: temp file + rename
    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| DeployError::Journal(format!("cannot write {}: {}", tmp_path.display(), e)))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        DeployError::Journal(format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;

    Ok(())
}

/// Create a new empty lock for a module.
pub fn new_lock(module: &str, network_id: u64) -> DeploymentLock {
    use crate::tripwire::eventlog::now_iso8601;
    DeploymentLock {
        schema: "1.0".to_string(),
        module: module.to_string(),
        network_id,
        generated_at: now_iso8601(),
        generator: format!("fragua {}", env!("CARGO_PKG_VERSION")),
        futures: IndexMap::new(),
    }
}

/// Build a lock from the completed steps of a run report.
pub fn lock_from_report(report: &DeploymentReport) -> DeploymentLock {
    let mut lock = new_lock(&report.module, report.network_id);
    for step in &report.steps {
        if step.status != StepStatus::Completed {
            continue;
        }
        if let Some(ref value) = step.result {
            lock.futures.insert(
                step.label.clone(),
                LockedFuture {
                    step_id: step.step_id.clone(),
                    kind: step.kind,
                    value: value.clone(),
                    transaction: step.transaction.clone(),
                },
            );
        }
    }
    lock
}

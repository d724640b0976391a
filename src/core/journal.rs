//! FR-016: Deployment journal — durable step outcomes and pending markers.
//!
//! The journal is append-mostly. A completed entry is never replaced; a
//! failed entry may be superseded by a later attempt. Effectful steps are
//! bracketed by a pending marker so a crash between confirmation and the
//! terminal append is detectable on the next run.

use super::error::{DeployError, Result};
use super::types::{JournalEntry, JournalStatus, PendingMarker, StepId, TransactionRef};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Durable store of step outcomes, keyed by step id.
pub trait Journal: Send {
    fn get(&self, step: &StepId) -> Option<JournalEntry>;

    /// Record a terminal outcome. Clears any pending marker for the step.
    fn append(&mut self, entry: JournalEntry) -> Result<()>;

    fn list_all(&self) -> Vec<JournalEntry>;

    fn mark_pending(&mut self, step: &StepId, fingerprint: &str) -> Result<()>;

    /// Attach the environment's transaction reference to a pending marker.
    fn record_submission(&mut self, step: &StepId, transaction: &TransactionRef) -> Result<()>;

    fn pending(&self, step: &StepId) -> Option<PendingMarker>;

    fn list_pending(&self) -> Vec<PendingMarker>;

    /// Drop a pending marker (operator recovery for indeterminate steps).
    fn clear_pending(&mut self, step: &StepId) -> Result<()>;

    fn network_id(&self) -> Option<u64>;

    fn bind_network(&mut self, network_id: u64) -> Result<()>;
}

/// One line of the on-disk journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum JournalRecord {
    Network {
        network_id: u64,
    },
    Pending(PendingMarker),
    Submitted {
        step_id: StepId,
        transaction: TransactionRef,
    },
    Cleared {
        step_id: StepId,
    },
    Entry(JournalEntry),
}

/// In-memory projection shared by every journal backend.
#[derive(Debug, Clone, Default)]
struct JournalState {
    entries: IndexMap<StepId, JournalEntry>,
    pending: IndexMap<StepId, PendingMarker>,
    network_id: Option<u64>,
}

impl JournalState {
    /// Reject entries that would rewrite completed history.
    fn check_append(&self, entry: &JournalEntry) -> Result<()> {
        let Some(existing) = self.entries.get(&entry.step_id) else {
            return Ok(());
        };
        if existing.status != JournalStatus::Completed {
            return Ok(());
        }
        if entry.status == JournalStatus::Completed && entry.result == existing.result {
            return Ok(());
        }
        Err(DeployError::conflict(
            entry.step_id.as_str(),
            format!(
                "completed entry already recorded with result {}, refusing {}",
                render(&existing.result),
                match entry.status {
                    JournalStatus::Completed => render(&entry.result),
                    JournalStatus::Failed => "a failure".to_string(),
                }
            ),
        ))
    }

    fn check_submission(&self, step: &StepId) -> Result<()> {
        if self.pending.contains_key(step) {
            Ok(())
        } else {
            Err(DeployError::conflict(
                step.as_str(),
                "submission recorded without a pending marker",
            ))
        }
    }

    fn check_network(&self, network_id: u64) -> Result<()> {
        match self.network_id {
            Some(bound) if bound != network_id => Err(DeployError::conflict(
                "network",
                format!("journal bound to network {}, got {}", bound, network_id),
            )),
            _ => Ok(()),
        }
    }

    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Network { network_id } => self.network_id = Some(network_id),
            JournalRecord::Pending(marker) => {
                self.pending.insert(marker.step_id.clone(), marker);
            }
            JournalRecord::Submitted {
                step_id,
                transaction,
            } => {
                if let Some(marker) = self.pending.get_mut(&step_id) {
                    marker.transaction = Some(transaction);
                }
            }
            JournalRecord::Cleared { step_id } => {
                self.pending.shift_remove(&step_id);
            }
            JournalRecord::Entry(entry) => {
                self.pending.shift_remove(&entry.step_id);
                self.entries.insert(entry.step_id.clone(), entry);
            }
        }
    }
}

fn render(value: &Option<serde_json::Value>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "null".to_string())
}

fn pending_marker(step: &StepId, fingerprint: &str) -> PendingMarker {
    PendingMarker {
        step_id: step.clone(),
        fingerprint: fingerprint.to_string(),
        transaction: None,
        marked_at: Utc::now(),
    }
}

// ============================================================================
// In-memory journal
// ============================================================================

/// Volatile journal for tests and throwaway runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    state: JournalState,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Journal for MemoryJournal {
    fn get(&self, step: &StepId) -> Option<JournalEntry> {
        self.state.entries.get(step).cloned()
    }

    fn append(&mut self, entry: JournalEntry) -> Result<()> {
        self.state.check_append(&entry)?;
        self.state.apply(JournalRecord::Entry(entry));
        Ok(())
    }

    fn list_all(&self) -> Vec<JournalEntry> {
        self.state.entries.values().cloned().collect()
    }

    fn mark_pending(&mut self, step: &StepId, fingerprint: &str) -> Result<()> {
        self.state
            .apply(JournalRecord::Pending(pending_marker(step, fingerprint)));
        Ok(())
    }

    fn record_submission(&mut self, step: &StepId, transaction: &TransactionRef) -> Result<()> {
        self.state.check_submission(step)?;
        self.state.apply(JournalRecord::Submitted {
            step_id: step.clone(),
            transaction: transaction.clone(),
        });
        Ok(())
    }

    fn pending(&self, step: &StepId) -> Option<PendingMarker> {
        self.state.pending.get(step).cloned()
    }

    fn list_pending(&self) -> Vec<PendingMarker> {
        self.state.pending.values().cloned().collect()
    }

    fn clear_pending(&mut self, step: &StepId) -> Result<()> {
        self.state.apply(JournalRecord::Cleared {
            step_id: step.clone(),
        });
        Ok(())
    }

    fn network_id(&self) -> Option<u64> {
        self.state.network_id
    }

    fn bind_network(&mut self, network_id: u64) -> Result<()> {
        self.state.check_network(network_id)?;
        self.state.apply(JournalRecord::Network { network_id });
        Ok(())
    }
}

// ============================================================================
// File journal
// ============================================================================

/// Derive the journal path for a module within the state directory.
pub fn journal_path(state_dir: &Path, module: &str) -> PathBuf {
    state_dir.join(module).join("journal.jsonl")
}

/// Append-only JSONL journal. Every record is synced before returning.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: File,
    state: JournalState,
}

impl FileJournal {
    /// Open (or create) the journal for a module and replay it.
    pub fn open(state_dir: &Path, module: &str) -> Result<Self> {
        Self::open_path(&journal_path(state_dir, module))
    }

    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DeployError::Journal(format!("cannot create dir {}: {}", parent.display(), e))
            })?;
        }

        let mut state = JournalState::default();
        let mut valid_len: u64 = 0;
        let mut torn = false;

        if path.exists() {
            let reader = BufReader::new(File::open(path).map_err(|e| {
                DeployError::Journal(format!("cannot read {}: {}", path.display(), e))
            })?);
            let mut lines = reader.split(b'\n').peekable();
            let mut line_no = 0usize;
            while let Some(line) = lines.next() {
                line_no += 1;
                let bytes = line.map_err(|e| {
                    DeployError::Journal(format!("cannot read {}: {}", path.display(), e))
                })?;
                let is_last = lines.peek().is_none();
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    if !is_last {
                        valid_len += bytes.len() as u64 + 1;
                    }
                    continue;
                }
                match serde_json::from_slice::<JournalRecord>(&bytes) {
                    Ok(record) => {
                        state.apply(record);
                        valid_len += bytes.len() as u64 + 1;
                    }
                    Err(e) if is_last => {
                        warn!(path = %path.display(), line = line_no, error = %e, "ignoring torn journal record");
                        torn = true;
                    }
                    Err(e) => {
                        return Err(DeployError::Journal(format!(
                            "corrupt journal {} at line {}: {}",
                            path.display(),
                            line_no,
                            e
                        )));
                    }
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| DeployError::Journal(format!("cannot open {}: {}", path.display(), e)))?;

        let on_disk = file
            .metadata()
            .map_err(|e| DeployError::Journal(format!("cannot stat {}: {}", path.display(), e)))?
            .len();
        if torn {
            file.set_len(valid_len).map_err(|e| {
                DeployError::Journal(format!("cannot truncate {}: {}", path.display(), e))
            })?;
        } else if valid_len > on_disk {
            // last record is complete but lost its newline
            writeln!(file).map_err(|e| {
                DeployError::Journal(format!("cannot write {}: {}", path.display(), e))
            })?;
        }

        debug!(
            path = %path.display(),
            entries = state.entries.len(),
            pending = state.pending.len(),
            "journal opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until the record is on disk; the engine issues writes from
    /// the blocking pool.
    fn write(&mut self, record: JournalRecord) -> Result<()> {
        let line = serde_json::to_string(&record)
            .map_err(|e| DeployError::Journal(format!("serialize error: {}", e)))?;
        writeln!(self.file, "{}", line)
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data())
            .map_err(|e| {
                DeployError::Journal(format!("cannot write {}: {}", self.path.display(), e))
            })?;
        self.state.apply(record);
        Ok(())
    }
}

impl Journal for FileJournal {
    fn get(&self, step: &StepId) -> Option<JournalEntry> {
        self.state.entries.get(step).cloned()
    }

    fn append(&mut self, entry: JournalEntry) -> Result<()> {
        self.state.check_append(&entry)?;
        self.write(JournalRecord::Entry(entry))
    }

    fn list_all(&self) -> Vec<JournalEntry> {
        self.state.entries.values().cloned().collect()
    }

    fn mark_pending(&mut self, step: &StepId, fingerprint: &str) -> Result<()> {
        self.write(JournalRecord::Pending(pending_marker(step, fingerprint)))
    }

    fn record_submission(&mut self, step: &StepId, transaction: &TransactionRef) -> Result<()> {
        self.state.check_submission(step)?;
        self.write(JournalRecord::Submitted {
            step_id: step.clone(),
            transaction: transaction.clone(),
        })
    }

    fn pending(&self, step: &StepId) -> Option<PendingMarker> {
        self.state.pending.get(step).cloned()
    }

    fn list_pending(&self) -> Vec<PendingMarker> {
        self.state.pending.values().cloned().collect()
    }

    fn clear_pending(&mut self, step: &StepId) -> Result<()> {
        self.write(JournalRecord::Cleared {
            step_id: step.clone(),
        })
    }

    fn network_id(&self) -> Option<u64> {
        self.state.network_id
    }

    fn bind_network(&mut self, network_id: u64) -> Result<()> {
        self.state.check_network(network_id)?;
        if self.state.network_id == Some(network_id) {
            return Ok(());
        }
        self.write(JournalRecord::Network { network_id })
    }
}

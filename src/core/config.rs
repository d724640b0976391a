//! FR-017: Engine configuration — retry, confirmation and parallelism policy.
//!
//! Loaded from YAML (`fragua.yaml`). Every field has a serde default so an
//! empty document is a valid configuration.

use super::error::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Execution policy for a deployment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Confirmation depth for effectful steps without their own constraint
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    /// Submission attempts before a transient failure becomes terminal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Cap on any single retry delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// How long to wait for a single confirmation
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    /// Stop scheduling new steps after this long
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,

    /// Concurrent steps within a batch
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Write the provenance event log
    #[serde(default = "default_true")]
    pub event_log: bool,

    /// Write the deployed lock snapshot after each run
    #[serde(default = "default_true")]
    pub lock_file: bool,

    /// Directory for event logs and lock snapshots; nothing is written when unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_confirmations() -> u64 {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_max_parallel() -> usize {
    4
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confirmations: default_confirmations(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            run_timeout_secs: None,
            max_parallel: default_max_parallel(),
            event_log: true,
            lock_file: true,
            state_dir: None,
        }
    }
}

impl EngineConfig {
    /// Delay before retry number `attempt` (1-based), capped at `max_backoff_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    /// Structural problems with the configuration (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_attempts == 0 {
            errors.push("max_attempts must be at least 1".to_string());
        }
        if self.max_parallel == 0 {
            errors.push("max_parallel must be at least 1".to_string());
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            errors.push(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            errors.push(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            ));
        }
        if self.confirmation_timeout_secs == 0 {
            errors.push("confirmation_timeout_secs must be at least 1".to_string());
        }
        errors
    }
}

/// Parse and validate an engine configuration from YAML.
pub fn parse_config(yaml: &str) -> Result<EngineConfig> {
    let config: EngineConfig = serde_yaml_ng::from_str(yaml)
        .map_err(|e| DeployError::Config(format!("YAML parse error: {}", e)))?;
    let errors = config.validate();
    if !errors.is_empty() {
        return Err(DeployError::Config(errors.join("; ")));
    }
    Ok(config)
}

/// Load an engine configuration file from disk.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| DeployError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fr017_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.confirmations, 1);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.max_parallel, 4);
        assert!(c.event_log);
        assert!(c.lock_file);
        assert!(c.state_dir.is_none());
        assert!(c.validate().is_empty());
    }

    #[test]
    fn test_fr017_empty_yaml_is_default() {
        let c = parse_config("{}").unwrap();
        assert_eq!(c, EngineConfig::default());
    }

    #[test]
    fn test_fr017_parse_overrides() {
        let yaml = r#"
confirmations: 5
max_attempts: 6
initial_backoff_ms: 100
max_backoff_ms: 1000
run_timeout_secs: 600
max_parallel: 2
event_log: false
state_dir: /var/lib/fragua
"#;
        let c = parse_config(yaml).unwrap();
        assert_eq!(c.confirmations, 5);
        assert_eq!(c.max_attempts, 6);
        assert_eq!(c.run_timeout(), Some(Duration::from_secs(600)));
        assert!(!c.event_log);
        assert_eq!(c.state_dir, Some(PathBuf::from("/var/lib/fragua")));
    }

    #[test]
    fn test_fr017_backoff_exponential_and_capped() {
        let c = EngineConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            ..EngineConfig::default()
        };
        assert_eq!(c.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(c.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(c.backoff_delay(3), Duration::from_millis(350));
        assert_eq!(c.backoff_delay(30), Duration::from_millis(350));
    }

    #[test]
    fn test_fr017_validate_rejects_bad_values() {
        let c = EngineConfig {
            max_attempts: 0,
            max_parallel: 0,
            backoff_multiplier: 0.5,
            ..EngineConfig::default()
        };
        let errors = c.validate();
        assert_eq!(errors.len(), 3);
        assert!(parse_config("max_attempts: 0").is_err());
    }

    #[test]
    fn test_fr017_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fragua.yaml");
        std::fs::write(&path, "confirmations: 12\n").unwrap();
        let c = load_config(&path).unwrap();
        assert_eq!(c.confirmations, 12);
        assert!(load_config(&dir.path().join("missing.yaml")).is_err());
    }
}

//! FR-011: Deterministic in-process chain.
//!
//! Addresses and transaction hashes derive from BLAKE3 over the network id
//! and a monotonically increasing nonce. Faults can be injected per subject
//! (artifact, function, event or recipient).

use super::{Confirmation, EnvironmentError, OperationSpec, TargetEnvironment};
use crate::core::types::TransactionRef;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct SubmitFault {
    subject: String,
    remaining: u32,
    error: EnvironmentError,
}

#[derive(Default)]
struct ChainState {
    nonce: u64,
    submissions: Vec<OperationSpec>,
    receipts: HashMap<TransactionRef, Confirmation>,
    faults: Vec<SubmitFault>,
    reverts: HashMap<String, String>,
    static_results: HashMap<String, Value>,
    event_args: HashMap<(String, String), Value>,
    confirmations_awaited: u32,
}

/// Simulated target environment.
pub struct SimulatedEnvironment {
    network_id: u64,
    confirmation_delay: Duration,
    state: Mutex<ChainState>,
}

impl SimulatedEnvironment {
    pub fn new(network_id: u64) -> Self {
        Self {
            network_id,
            confirmation_delay: Duration::ZERO,
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Make every confirmation take `delay`.
    pub fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `times` submissions whose subject matches.
    pub fn fail_submissions(&self, subject: &str, times: u32, error: EnvironmentError) {
        self.lock().faults.push(SubmitFault {
            subject: subject.to_string(),
            remaining: times,
            error,
        });
    }

    /// Revert every operation whose subject matches.
    pub fn revert(&self, subject: &str, reason: &str) {
        self.lock()
            .reverts
            .insert(subject.to_string(), reason.to_string());
    }

    pub fn set_static_result(&self, function: &str, value: Value) {
        self.lock().static_results.insert(function.to_string(), value);
    }

    pub fn set_event_argument(&self, event: &str, argument: &str, value: Value) {
        self.lock()
            .event_args
            .insert((event.to_string(), argument.to_string()), value);
    }

    /// Operations accepted so far, in submission order.
    pub fn submissions(&self) -> Vec<OperationSpec> {
        self.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.lock().submissions.len()
    }

    pub fn confirmations_awaited(&self) -> u32 {
        self.lock().confirmations_awaited
    }

    fn derive_hex(&self, domain: &str, nonce: u64) -> String {
        let input = format!("{}:{}:{}", domain, self.network_id, nonce);
        blake3::hash(input.as_bytes()).to_hex().to_string()
    }
}

fn take_fault(state: &mut ChainState, subject: &str) -> Option<EnvironmentError> {
    let fault = state
        .faults
        .iter_mut()
        .find(|f| f.subject == subject && f.remaining > 0)?;
    fault.remaining -= 1;
    Some(fault.error.clone())
}

#[async_trait]
impl TargetEnvironment for SimulatedEnvironment {
    async fn submit(&self, op: &OperationSpec) -> Result<TransactionRef, EnvironmentError> {
        let mut state = self.lock();
        if let Some(err) = take_fault(&mut state, op.subject()) {
            return Err(err);
        }
        if let OperationSpec::ReadEvent { transaction, .. } = op {
            if !state.receipts.contains_key(transaction) {
                return Err(EnvironmentError::NotFound(transaction.to_string()));
            }
        }

        state.nonce += 1;
        let nonce = state.nonce;
        let tx = TransactionRef(format!("0x{}", self.derive_hex("tx", nonce)));

        let outcome = if let Some(reason) = state.reverts.get(op.subject()) {
            Confirmation::Reverted {
                reason: reason.clone(),
            }
        } else {
            let observed = match op {
                OperationSpec::Deploy { .. } => {
                    Value::String(format!("0x{}", &self.derive_hex("addr", nonce)[..40]))
                }
                OperationSpec::Call { .. } | OperationSpec::Send { .. } => {
                    Value::String(tx.0.clone())
                }
                OperationSpec::StaticCall { function, .. } => state
                    .static_results
                    .get(function)
                    .cloned()
                    .unwrap_or(Value::Null),
                OperationSpec::ReadEvent {
                    event, argument, ..
                } => state
                    .event_args
                    .get(&(event.clone(), argument.clone()))
                    .cloned()
                    .unwrap_or(Value::Null),
            };
            Confirmation::Success { observed }
        };

        state.submissions.push(op.clone());
        state.receipts.insert(tx.clone(), outcome);
        Ok(tx)
    }

    async fn await_confirmation(
        &self,
        tx: &TransactionRef,
        _depth: u64,
    ) -> Result<Confirmation, EnvironmentError> {
        if !self.confirmation_delay.is_zero() {
            tokio::time::sleep(self.confirmation_delay).await;
        }
        let mut state = self.lock();
        state.confirmations_awaited += 1;
        state
            .receipts
            .get(tx)
            .cloned()
            .ok_or_else(|| EnvironmentError::NotFound(tx.to_string()))
    }

    async fn current_network_id(&self) -> Result<u64, EnvironmentError> {
        Ok(self.network_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Overrides;
    use serde_json::json;

    fn deploy(artifact: &str) -> OperationSpec {
        OperationSpec::Deploy {
            artifact: artifact.to_string(),
            args: vec![],
            value: None,
            overrides: Overrides::default(),
        }
    }

    #[tokio::test]
    async fn test_fr011_deploy_yields_address() {
        let env = SimulatedEnvironment::new(31337);
        let tx = env.submit(&deploy("Token")).await.unwrap();
        assert!(tx.0.starts_with("0x"));
        assert_eq!(tx.0.len(), 66);
        match env.await_confirmation(&tx, 1).await.unwrap() {
            Confirmation::Success { observed } => {
                let addr = observed.as_str().unwrap();
                assert!(addr.starts_with("0x"));
                assert_eq!(addr.len(), 42);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(env.submission_count(), 1);
        assert_eq!(env.confirmations_awaited(), 1);
    }

    #[tokio::test]
    async fn test_fr011_deterministic_across_instances() {
        let a = SimulatedEnvironment::new(1);
        let b = SimulatedEnvironment::new(1);
        let c = SimulatedEnvironment::new(2);
        let ta = a.submit(&deploy("X")).await.unwrap();
        let tb = b.submit(&deploy("X")).await.unwrap();
        let tc = c.submit(&deploy("X")).await.unwrap();
        assert_eq!(ta, tb);
        assert_ne!(ta, tc);
    }

    #[tokio::test]
    async fn test_fr011_fault_injection_consumed() {
        let env = SimulatedEnvironment::new(1);
        env.fail_submissions("Token", 2, EnvironmentError::Transient("nonce".into()));
        assert!(env.submit(&deploy("Token")).await.is_err());
        assert!(env.submit(&deploy("Other")).await.is_ok());
        assert!(env.submit(&deploy("Token")).await.is_err());
        assert!(env.submit(&deploy("Token")).await.is_ok());
        assert_eq!(env.submission_count(), 2);
    }

    #[tokio::test]
    async fn test_fr011_revert() {
        let env = SimulatedEnvironment::new(1);
        env.revert("Token", "constructor reverted");
        let tx = env.submit(&deploy("Token")).await.unwrap();
        let c = env.await_confirmation(&tx, 1).await.unwrap();
        assert_eq!(
            c,
            Confirmation::Reverted {
                reason: "constructor reverted".into()
            }
        );
    }

    #[tokio::test]
    async fn test_fr011_static_call_and_event() {
        let env = SimulatedEnvironment::new(1);
        env.set_static_result("totalSupply", json!(1000));
        env.set_event_argument("Transfer", "value", json!(7));

        let q = OperationSpec::StaticCall {
            contract: "0xabc".into(),
            function: "totalSupply".into(),
            args: vec![],
            from: None,
        };
        let tx = env.submit(&q).await.unwrap();
        assert_eq!(
            env.await_confirmation(&tx, 0).await.unwrap(),
            Confirmation::Success {
                observed: json!(1000)
            }
        );

        let ev = OperationSpec::ReadEvent {
            transaction: tx,
            emitter: None,
            event: "Transfer".into(),
            argument: "value".into(),
            index: 0,
        };
        let etx = env.submit(&ev).await.unwrap();
        assert_eq!(
            env.await_confirmation(&etx, 0).await.unwrap(),
            Confirmation::Success { observed: json!(7) }
        );
    }

    #[tokio::test]
    async fn test_fr011_unknown_transaction() {
        let env = SimulatedEnvironment::new(1);
        let missing = TransactionRef("0xdead".into());
        assert!(matches!(
            env.await_confirmation(&missing, 1).await,
            Err(EnvironmentError::NotFound(_))
        ));
        let ev = OperationSpec::ReadEvent {
            transaction: missing,
            emitter: None,
            event: "E".into(),
            argument: "a".into(),
            index: 0,
        };
        assert!(env.submit(&ev).await.is_err());
        assert_eq!(env.current_network_id().await.unwrap(), 1);
    }
}

//! End-to-end deployment scenarios against the simulated environment.

use async_trait::async_trait;
use fragua::core::journal::journal_path;
use fragua::core::state::load_lock;
use fragua::core::types::{StepErrorKind, StepId, StepStatus, TransactionRef};
use fragua::environment::{Confirmation, EnvironmentError, OperationSpec};
use fragua::tripwire::eventlog::read_events;
use fragua::{
    DeployError, DeploymentParameters, Engine, EngineConfig, FileJournal, Input, Journal, Module,
    ModuleBuilder, RunOutcome, SimulatedEnvironment, StepOptions, TargetEnvironment,
};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(state_dir: &Path) -> EngineConfig {
    EngineConfig {
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        confirmation_timeout_secs: 5,
        state_dir: Some(state_dir.to_path_buf()),
        ..EngineConfig::default()
    }
}

/// Token deployment, a parameterized mint, and an unrelated registry.
fn token_module(amount: u64) -> Module {
    let mut m = ModuleBuilder::new("TokenModule");
    let owner = m.parameter("owner", None);
    let token = m.contract_with("Token", vec![Input::literal("Degen")], StepOptions::labeled("token"));
    m.call_with(
        &token,
        "mint",
        vec![Input::from(&owner), Input::literal(amount)],
        StepOptions::labeled("mintTx"),
    );
    m.contract("Registry", vec![]);
    m.build()
}

fn params() -> DeploymentParameters {
    let mut p = DeploymentParameters::new();
    p.set("TokenModule", "owner", "0x00000000000000000000000000000000000000aa");
    p
}

fn mint_id() -> StepId {
    StepId::from("TokenModule#call:mintTx")
}

/// Environment that dies while awaiting confirmation, after the
/// operation was accepted.
struct CrashingEnvironment {
    inner: Arc<SimulatedEnvironment>,
    crash: AtomicBool,
}

#[async_trait]
impl TargetEnvironment for CrashingEnvironment {
    async fn submit(&self, op: &OperationSpec) -> Result<TransactionRef, EnvironmentError> {
        self.inner.submit(op).await
    }

    async fn await_confirmation(
        &self,
        tx: &TransactionRef,
        depth: u64,
    ) -> Result<Confirmation, EnvironmentError> {
        if self.crash.load(Ordering::SeqCst) {
            panic!("process killed while awaiting {}", tx);
        }
        self.inner.await_confirmation(tx, depth).await
    }

    async fn current_network_id(&self) -> Result<u64, EnvironmentError> {
        self.inner.current_network_id().await
    }
}

#[tokio::test]
async fn rerun_after_success_submits_nothing() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(SimulatedEnvironment::new(31337));

    let first = {
        let journal = FileJournal::open(dir.path(), "TokenModule").unwrap();
        let engine = Engine::new(Arc::clone(&env), journal, config(dir.path()));
        engine.deploy(&token_module(1000), &params()).await.unwrap()
    };
    assert_eq!(first.outcome, RunOutcome::Success);
    assert_eq!(env.submission_count(), 3);

    let journal = FileJournal::open(dir.path(), "TokenModule").unwrap();
    let engine = Engine::new(Arc::clone(&env), journal, config(dir.path()));
    let second = engine.deploy(&token_module(1000), &params()).await.unwrap();
    assert_eq!(second.outcome, RunOutcome::Success);
    assert_eq!(second.reused, 3);
    assert_eq!(env.submission_count(), 3);
    assert_eq!(second.resolved_values(), first.resolved_values());

    let lock = load_lock(dir.path(), "TokenModule").unwrap().unwrap();
    assert_eq!(lock.futures.len(), 3);
    let events = read_events(dir.path(), "TokenModule").unwrap();
    assert!(!events.is_empty());
}

#[tokio::test]
async fn changed_mint_amount_is_stale_not_reminted() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(SimulatedEnvironment::new(1));
    let journal = FileJournal::open(dir.path(), "TokenModule").unwrap();
    let engine = Engine::new(Arc::clone(&env), journal, config(dir.path()));

    engine.deploy(&token_module(1000), &params()).await.unwrap();
    let report = engine.deploy(&token_module(2000), &params()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    let mint = report.step(&mint_id()).unwrap();
    assert_eq!(mint.status, StepStatus::Failed);
    assert_eq!(
        mint.failure.as_ref().map(|f| f.kind),
        Some(StepErrorKind::StaleStep)
    );
    let mints = env
        .submissions()
        .iter()
        .filter(|op| op.subject() == "mint")
        .count();
    assert_eq!(mints, 1);

    let plan = engine.plan(&token_module(2000), &params()).await.unwrap();
    assert!(matches!(plan.ensure_fresh(), Err(DeployError::StaleStep { .. })));
}

#[tokio::test]
async fn crash_after_submission_resumes_without_resubmitting() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let chain = Arc::new(SimulatedEnvironment::new(1));
    let crashing = Arc::new(CrashingEnvironment {
        inner: Arc::clone(&chain),
        crash: AtomicBool::new(true),
    });

    let mut m = ModuleBuilder::new("Single");
    m.contract("Vault", vec![]);
    let module = m.build();
    let no_params = DeploymentParameters::new();

    let journal = FileJournal::open(dir.path(), "Single").unwrap();
    let engine = Engine::new(Arc::clone(&crashing), journal, config(dir.path()));
    let crashed = engine.deploy(&module, &no_params).await;
    assert!(matches!(crashed, Err(DeployError::Task(_))));
    assert_eq!(chain.submission_count(), 1);
    drop(engine);

    // the pending marker with its transaction survived on disk
    let journal = FileJournal::open(dir.path(), "Single").unwrap();
    let pending = journal.list_pending();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].transaction.is_some());

    let engine = Engine::new(Arc::clone(&chain), journal, config(dir.path()));
    let report = engine.deploy(&module, &no_params).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(chain.submission_count(), 1);
    let vault = report.step(&StepId::from("Single#deploy:Vault")).unwrap();
    assert_eq!(vault.attempts, 0);
    assert_eq!(vault.transaction, pending[0].transaction);
    assert_eq!(report.submitted, 0);
    assert_eq!(chain.confirmations_awaited(), 1);
}

#[tokio::test]
async fn torn_journal_tail_is_ignored() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(SimulatedEnvironment::new(1));
    {
        let journal = FileJournal::open(dir.path(), "TokenModule").unwrap();
        let engine = Engine::new(Arc::clone(&env), journal, config(dir.path()));
        engine.deploy(&token_module(1000), &params()).await.unwrap();
    }

    let path = journal_path(dir.path(), "TokenModule");
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    write!(file, "{{\"record\":\"entry\",\"step_id\":\"TokenMod").unwrap();
    drop(file);

    let journal = FileJournal::open(dir.path(), "TokenModule").unwrap();
    assert_eq!(journal.list_all().len(), 3);
    let engine = Engine::new(Arc::clone(&env), journal, config(dir.path()));
    let report = engine.deploy(&token_module(1000), &params()).await.unwrap();
    assert_eq!(report.reused, 3);
    assert_eq!(env.submission_count(), 3);
}

#[tokio::test]
async fn failed_branch_leaves_unrelated_work_intact() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let env = Arc::new(SimulatedEnvironment::new(1));
    env.fail_submissions("Token", 5, EnvironmentError::Rejected("out of gas".into()));

    let journal = FileJournal::open(dir.path(), "TokenModule").unwrap();
    let engine = Engine::new(Arc::clone(&env), journal, config(dir.path()));
    let report = engine.deploy(&token_module(1000), &params()).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    assert_eq!(report.failed, 1);
    assert_eq!(report.blocked, 1);
    assert_eq!(report.step(&mint_id()).unwrap().status, StepStatus::Blocked);
    assert_eq!(
        report.outputs["Registry"].value().map(|v| v.is_string()),
        Some(true)
    );

    let lock = load_lock(dir.path(), "TokenModule").unwrap().unwrap();
    assert_eq!(lock.futures.keys().collect::<Vec<_>>(), vec!["Registry"]);
}

#[tokio::test]
async fn wrong_network_rejected_before_any_submission() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    {
        let journal = FileJournal::open(dir.path(), "TokenModule").unwrap();
        let engine = Engine::new(
            Arc::new(SimulatedEnvironment::new(1)),
            journal,
            config(dir.path()),
        );
        engine.deploy(&token_module(1000), &params()).await.unwrap();
    }

    let other = Arc::new(SimulatedEnvironment::new(5));
    let journal = FileJournal::open(dir.path(), "TokenModule").unwrap();
    let engine = Engine::new(Arc::clone(&other), journal, config(dir.path()));
    let result = engine.deploy(&token_module(1000), &params()).await;
    match result {
        Err(DeployError::Conflict { message, .. }) => assert!(message.contains("network")),
        unexpected => panic!("expected conflict, got {:?}", unexpected.map(|r| r.outcome)),
    }
    assert_eq!(other.submission_count(), 0);
}

#[tokio::test]
async fn missing_parameter_fails_validation() {
    let env = Arc::new(SimulatedEnvironment::new(1));
    let engine = Engine::new(
        Arc::clone(&env),
        fragua::MemoryJournal::new(),
        EngineConfig::default(),
    );
    match engine
        .deploy(&token_module(1), &DeploymentParameters::new())
        .await
    {
        Err(DeployError::Validation { errors }) => {
            assert!(errors.iter().any(|e| e.contains("owner")));
        }
        unexpected => panic!("expected validation error, got {:?}", unexpected.map(|r| r.outcome)),
    }
    assert_eq!(env.submission_count(), 0);
}

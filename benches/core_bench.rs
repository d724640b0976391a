//! Benchmarks for fragua core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fragua::core::graph::build_graph;
use fragua::core::journal::MemoryJournal;
use fragua::core::reconciler::{fingerprint_step, reconcile};
use fragua::core::resolver::execution_batches;
use fragua::core::types::{DeploymentParameters, Input, Module};
use fragua::{Engine, EngineConfig, ModuleBuilder, SimulatedEnvironment, StepOptions};
use std::sync::Arc;

/// N independent deployments (one wide batch).
fn wide_module(n: usize) -> Module {
    let mut m = ModuleBuilder::new("Wide");
    for i in 0..n {
        m.contract_with("Leaf", vec![Input::literal(i)], StepOptions::labeled(&format!("leaf-{i:04}")));
    }
    m.build()
}

/// A chain of N calls, each ordered after the previous one.
fn deep_module(n: usize) -> Module {
    let mut m = ModuleBuilder::new("Deep");
    let root = m.contract("Root", vec![]);
    let mut prev = root.clone();
    for i in 0..n {
        let opts = StepOptions::labeled(&format!("call-{i:04}")).after(&prev);
        prev = m.call_with(&root, "step", vec![Input::literal(i)], opts);
    }
    m.build()
}

fn bench_build_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_graph");
    let params = DeploymentParameters::new();
    for n in [10, 100, 500] {
        let module = deep_module(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &module, |b, module| {
            b.iter(|| black_box(build_graph(black_box(module), &params).unwrap()));
        });
    }
    group.finish();
}

fn bench_execution_batches(c: &mut Criterion) {
    let params = DeploymentParameters::new();
    let mut group = c.benchmark_group("execution_batches");
    for n in [10, 100, 500] {
        let wide = build_graph(&wide_module(n), &params).unwrap();
        let deep = build_graph(&deep_module(n), &params).unwrap();
        group.bench_with_input(BenchmarkId::new("wide", n), &wide, |b, g| {
            b.iter(|| black_box(execution_batches(black_box(g)).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("deep", n), &deep, |b, g| {
            b.iter(|| black_box(execution_batches(black_box(g)).unwrap()));
        });
    }
    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let graph = build_graph(&deep_module(100), &DeploymentParameters::new()).unwrap();
    c.bench_function("fingerprint_100_steps", |b| {
        b.iter(|| {
            for step in graph.steps() {
                black_box(fingerprint_step(black_box(step), &graph));
            }
        });
    });
}

fn bench_reconcile_fresh(c: &mut Criterion) {
    let graph = build_graph(&wide_module(200), &DeploymentParameters::new()).unwrap();
    let journal = MemoryJournal::new();
    c.bench_function("reconcile_200_fresh", |b| {
        b.iter(|| black_box(reconcile(&graph, &journal)));
    });
}

fn bench_simulated_deploy(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let module = wide_module(50);
    let params = DeploymentParameters::new();
    c.bench_function("deploy_50_simulated", |b| {
        b.to_async(&runtime).iter(|| async {
            let env = Arc::new(SimulatedEnvironment::new(31337));
            let engine = Engine::new(env, MemoryJournal::new(), EngineConfig::default());
            black_box(engine.deploy(&module, &params).await.unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_build_graph,
    bench_execution_batches,
    bench_fingerprint,
    bench_reconcile_fresh,
    bench_simulated_deploy
);
criterion_main!(benches);

//! FR-003: Dependency resolver — batch-wise topological sort.
//!
//! Kahn's algorithm over future and `after` edges. Each round of zero
//! in-degree steps becomes one [`ExecutionBatch`]; ties are broken by
//! declaration order so the output is deterministic.

use super::error::{DeployError, Result};
use super::graph::DeploymentGraph;
use super::types::*;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Compute the ordered execution batches for a graph.
pub fn execution_batches(graph: &DeploymentGraph) -> Result<Vec<ExecutionBatch>> {
    let mut in_degree: IndexMap<&StepId, usize> = graph
        .step_ids()
        .map(|id| (id, graph.dependencies_of(id).len()))
        .collect();

    let mut ready: Vec<&StepId> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut batches: Vec<ExecutionBatch> = Vec::new();
    let mut placed = 0usize;

    while !ready.is_empty() {
        ready.sort_by_key(|id| graph.declaration_index(id));

        let mut next_ready: Vec<&StepId> = Vec::new();
        for id in &ready {
            for dependent in graph.dependents_of(id) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(dependent);
                    }
                }
            }
        }

        placed += ready.len();
        batches.push(ExecutionBatch {
            index: batches.len(),
            steps: ready.iter().map(|id| (*id).clone()).collect(),
        });
        ready = next_ready;
    }

    if placed != graph.len() {
        let remaining: Vec<&StepId> = in_degree
            .iter()
            .filter(|(_, &d)| d > 0)
            .map(|(id, _)| *id)
            .collect();
        let cycle = find_cycle(graph, &remaining)
            .unwrap_or_else(|| remaining.iter().map(|id| (*id).clone()).collect());
        return Err(DeployError::Cycle { cycle });
    }

    Ok(batches)
}

/// Depth-first search for one concrete cycle among the unresolved steps.
/// The returned path follows dependency edges and does not repeat its start.
fn find_cycle(graph: &DeploymentGraph, remaining: &[&StepId]) -> Option<Vec<StepId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Visit {
        Unvisited,
        Visiting,
        Visited,
    }

    fn dfs<'a>(
        node: &'a StepId,
        graph: &'a DeploymentGraph,
        state: &mut HashMap<&'a StepId, Visit>,
        path: &mut Vec<&'a StepId>,
    ) -> Option<Vec<StepId>> {
        state.insert(node, Visit::Visiting);
        path.push(node);

        for dep in graph.dependencies_of(node) {
            match state.get(dep).copied() {
                Some(Visit::Visiting) => {
                    let start = path.iter().position(|p| *p == dep)?;
                    return Some(path[start..].iter().map(|p| (*p).clone()).collect());
                }
                Some(Visit::Unvisited) => {
                    if let Some(cycle) = dfs(dep, graph, state, path) {
                        return Some(cycle);
                    }
                }
                // resolved steps and finished subtrees cannot close a cycle
                Some(Visit::Visited) | None => {}
            }
        }

        path.pop();
        state.insert(node, Visit::Visited);
        None
    }

    let mut state: HashMap<&StepId, Visit> =
        remaining.iter().map(|id| (*id, Visit::Unvisited)).collect();
    let mut path: Vec<&StepId> = Vec::new();

    for start in remaining {
        if state.get(start).copied() == Some(Visit::Unvisited) {
            if let Some(cycle) = dfs(start, graph, &mut state, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::{ModuleBuilder, StepOptions};
    use crate::core::graph::build_graph;
    use proptest::prelude::*;

    fn batches_of(module: &Module) -> Result<Vec<ExecutionBatch>> {
        let graph = build_graph(module, &DeploymentParameters::new())?;
        execution_batches(&graph)
    }

    fn labels(batches: &[ExecutionBatch]) -> Vec<Vec<&str>> {
        batches
            .iter()
            .map(|b| {
                b.steps
                    .iter()
                    .map(|id| id.as_str().rsplit(':').next().unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_fr003_token_then_mint() {
        let mut m = ModuleBuilder::new("TokenModule");
        let token = m.contract_with("Token", vec![], StepOptions::labeled("deployToken"));
        m.call_with(&token, "mint", vec![Input::literal(1000)], StepOptions::labeled("mint"));
        let batches = batches_of(&m.build()).unwrap();
        assert_eq!(labels(&batches), vec![vec!["deployToken"], vec!["mint"]]);
        assert_eq!(batches[1].index, 1);
    }

    #[test]
    fn test_fr003_diamond() {
        let mut m = ModuleBuilder::new("M");
        let a = m.contract("A", vec![]);
        let b = m.contract("B", vec![Input::from(&a)]);
        let c = m.contract("C", vec![Input::from(&a)]);
        m.contract("D", vec![Input::from(&b), Input::from(&c)]);
        let batches = batches_of(&m.build()).unwrap();
        assert_eq!(labels(&batches), vec![vec!["A"], vec!["B", "C"], vec!["D"]]);
    }

    #[test]
    fn test_fr003_declaration_order_tiebreak() {
        let mut m = ModuleBuilder::new("M");
        m.contract("Zeta", vec![]);
        m.contract("Alpha", vec![]);
        m.contract("Mid", vec![]);
        let batches = batches_of(&m.build()).unwrap();
        assert_eq!(labels(&batches), vec![vec!["Zeta", "Alpha", "Mid"]]);
    }

    #[test]
    fn test_fr003_after_edges_order() {
        let mut m = ModuleBuilder::new("M");
        let a = m.contract("A", vec![]);
        m.contract_with("B", vec![], StepOptions::default().after(&a));
        let batches = batches_of(&m.build()).unwrap();
        assert_eq!(labels(&batches), vec![vec!["A"], vec!["B"]]);
    }

    #[test]
    fn test_fr003_empty_module() {
        let batches = batches_of(&ModuleBuilder::new("Empty").build()).unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn test_fr003_two_step_cycle() {
        let a = StepId::from("M#deploy:A");
        let b = StepId::from("M#deploy:B");
        let mut m = ModuleBuilder::new("M");
        m.contract("A", vec![Input::future(b.clone())]);
        m.contract("B", vec![Input::future(a.clone())]);
        m.contract("C", vec![]);
        match batches_of(&m.build()) {
            Err(DeployError::Cycle { cycle }) => {
                assert_eq!(cycle.len(), 2);
                assert!(cycle.contains(&a));
                assert!(cycle.contains(&b));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_fr003_cycle_excludes_downstream() {
        // D hangs off the A->B->C loop but is not part of it
        let mut m = ModuleBuilder::new("M");
        m.contract("A", vec![Input::future("M#deploy:C")]);
        m.contract("B", vec![Input::future("M#deploy:A")]);
        m.contract("C", vec![Input::future("M#deploy:B")]);
        m.contract("D", vec![Input::future("M#deploy:C")]);
        match batches_of(&m.build()) {
            Err(DeployError::Cycle { cycle }) => {
                assert_eq!(cycle.len(), 3);
                assert!(!cycle.contains(&StepId::from("M#deploy:D")));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    fn random_dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (1usize..24).prop_flat_map(|n| {
            let edges = proptest::collection::vec((0..n, 0..n), 0..n * 2);
            (Just(n), edges)
        })
    }

    proptest! {
        #[test]
        fn test_fr003_batches_respect_every_edge((n, raw_edges) in random_dag()) {
            // orient every edge from lower to higher index so the graph is acyclic
            let edges: Vec<(usize, usize)> = raw_edges
                .into_iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect();

            let mut m = ModuleBuilder::new("P");
            let mut handles = Vec::new();
            for i in 0..n {
                let mut opts = StepOptions::labeled(&format!("s{}", i));
                for (from, to) in &edges {
                    if *to == i {
                        opts = opts.after(&handles[*from]);
                    }
                }
                handles.push(m.contract_with("Art", vec![], opts));
            }

            let batches = batches_of(&m.build()).unwrap();
            let mut batch_of: HashMap<StepId, usize> = HashMap::new();
            for batch in &batches {
                for id in &batch.steps {
                    prop_assert!(batch_of.insert(id.clone(), batch.index).is_none());
                }
            }
            prop_assert_eq!(batch_of.len(), n);
            for (from, to) in &edges {
                prop_assert!(batch_of[handles[*from].id()] < batch_of[handles[*to].id()]);
            }
        }
    }
}

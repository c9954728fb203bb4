//! Property tests for graph construction and scheduling queries.

use proptest::prelude::*;
use rustc_hash::FxHashSet;

use taskloom::dag::Dag;
use taskloom::definition::{Definition, Step};
use taskloom::error::EngineError;

fn step_id(index: usize) -> String {
    format!("s{index}")
}

/// Dependency lists where step `i` may only depend on steps `j < i`,
/// guaranteeing acyclicity by construction.
fn acyclic_deps() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..10).prop_flat_map(|n| {
        prop::collection::vec(any::<bool>(), n * (n - 1) / 2).prop_map(move |bits| {
            let mut deps = vec![Vec::new(); n];
            let mut k = 0;
            for i in 0..n {
                for j in 0..i {
                    if bits[k] {
                        deps[i].push(j);
                    }
                    k += 1;
                }
            }
            deps
        })
    })
}

fn definition_from(deps: &[Vec<usize>]) -> Definition {
    let mut def = Definition::new("prop", "Property");
    for (i, step_deps) in deps.iter().enumerate() {
        let mut step = Step::new(step_id(i), step_id(i), "task");
        for dep in step_deps {
            step = step.with_dependency(step_id(*dep));
        }
        def = def.with_step(step);
    }
    def
}

proptest! {
    /// Acyclic definitions always validate and topo-sort places every step
    /// after all of its dependencies.
    #[test]
    fn topo_sort_respects_dependencies(deps in acyclic_deps()) {
        let def = definition_from(&deps);
        let dag = Dag::build(&def).expect("acyclic by construction");

        let sorted = dag.topo_sort();
        prop_assert_eq!(sorted.len(), deps.len());
        let position = |id: &str| sorted.iter().position(|s| s == id).unwrap();
        for (i, step_deps) in deps.iter().enumerate() {
            for dep in step_deps {
                prop_assert!(position(&step_id(*dep)) < position(&step_id(i)));
            }
        }
    }

    /// Closing any chain back to its start always raises a cycle error whose
    /// reported path avoids nodes outside the cycle.
    #[test]
    fn forced_back_edge_is_always_detected(n in 2usize..8, extra in 0usize..4) {
        let mut def = Definition::new("cyclic", "Cyclic");
        // A chain s0 <- s1 <- ... <- s(n-1), closed by s0 depending on the tail.
        for i in 0..n {
            let mut step = Step::new(step_id(i), step_id(i), "task");
            if i > 0 {
                step = step.with_dependency(step_id(i - 1));
            } else {
                step = step.with_dependency(step_id(n - 1));
            }
            def = def.with_step(step);
        }
        // Free-standing steps outside the cycle.
        for i in 0..extra {
            def = def.with_step(Step::new(format!("free{i}"), "Free", "task"));
        }

        match Dag::build(&def) {
            Err(EngineError::CyclicDependency { cycle }) => {
                prop_assert!(cycle.len() >= 2);
                prop_assert_eq!(cycle.first(), cycle.last());
                for node in &cycle {
                    prop_assert!(!node.starts_with("free"));
                }
            }
            other => prop_assert!(false, "expected CyclicDependency, got {:?}", other.err()),
        }
    }

    /// The ready frontier is exactly the set of unfinished steps whose
    /// dependencies are all completed.
    #[test]
    fn ready_frontier_is_exact(deps in acyclic_deps(), mask in prop::collection::vec(any::<bool>(), 10)) {
        let def = definition_from(&deps);
        let dag = Dag::build(&def).expect("acyclic by construction");

        let completed: FxHashSet<String> = (0..deps.len())
            .filter(|i| mask.get(*i).copied().unwrap_or(false))
            .map(step_id)
            .collect();

        let ready: FxHashSet<String> = dag
            .ready_steps(&completed)
            .iter()
            .map(|s| s.id.clone())
            .collect();

        for (i, step_deps) in deps.iter().enumerate() {
            let id = step_id(i);
            let eligible = !completed.contains(&id)
                && step_deps.iter().all(|d| completed.contains(&step_id(*d)));
            prop_assert_eq!(ready.contains(&id), eligible, "step {}", id);
        }
    }
}

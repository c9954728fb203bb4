//! Dependency graph construction and scheduling queries.
//!
//! [`Dag::build`] turns a validated [`Definition`] into an explicit graph
//! with precomputed in/out degrees in O(V + E), rejecting unknown dependency
//! ids and duplicate step ids. Cycle detection runs Kahn's algorithm: seed a
//! queue with the zero-in-degree nodes, drain it while decrementing successor
//! degrees, and if the resulting ordering is shorter than the node set a
//! cycle exists; one representative cycle path is recovered by walking the
//! unvisited remainder.
//!
//! [`Dag::ready_steps`] is the scheduler's core query: the steps that are not
//! yet completed and whose dependencies all are. Failed steps never enter the
//! completed set, which is how failure blocks a downstream subtree.
//!
//! # Examples
//!
//! ```rust
//! use taskloom::dag::Dag;
//! use taskloom::definition::{Definition, Step};
//! use rustc_hash::FxHashSet;
//!
//! let def = Definition::new("wf", "Flow")
//!     .with_step(Step::new("a", "A", "task"))
//!     .with_step(Step::new("b", "B", "task").with_dependency("a"));
//! let dag = Dag::build(&def).unwrap();
//!
//! let mut completed = FxHashSet::default();
//! assert_eq!(dag.ready_steps(&completed).len(), 1);
//! completed.insert("a".to_string());
//! assert_eq!(dag.ready_steps(&completed)[0].id, "b");
//! ```

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

use crate::definition::{Definition, Step};
use crate::error::EngineError;

/// A step together with its precomputed degree counts.
#[derive(Clone, Debug)]
pub struct DagNode {
    pub step: Step,
    /// Number of dependencies (incoming edges).
    pub in_degree: usize,
    /// Number of dependents (outgoing edges).
    pub out_degree: usize,
}

/// Directed acyclic dependency graph over a definition's steps.
///
/// Invariants: every dependency id is a node key and the graph contains no
/// cycle; both are enforced by [`Dag::build`]. Node iteration follows
/// definition order so scheduling is stable.
#[derive(Clone, Debug)]
pub struct Dag {
    nodes: FxHashMap<String, DagNode>,
    deps: FxHashMap<String, Vec<String>>,
    order: Vec<String>,
}

impl Dag {
    /// Builds the graph from a definition.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] for duplicate step ids or dependencies on
    /// unknown ids; [`EngineError::CyclicDependency`] when the dependency
    /// relation contains a cycle.
    pub fn build(definition: &Definition) -> Result<Self, EngineError> {
        let mut issues = Vec::new();
        let mut nodes: FxHashMap<String, DagNode> = FxHashMap::default();
        let mut deps: FxHashMap<String, Vec<String>> = FxHashMap::default();
        let mut order = Vec::with_capacity(definition.steps.len());

        for step in &definition.steps {
            if nodes.contains_key(&step.id) {
                issues.push(format!("duplicate step id '{}'", step.id));
                continue;
            }
            order.push(step.id.clone());
            deps.insert(step.id.clone(), step.dependencies.clone());
            nodes.insert(
                step.id.clone(),
                DagNode {
                    step: step.clone(),
                    in_degree: step.dependencies.len(),
                    out_degree: 0,
                },
            );
        }

        for (id, dep_ids) in &deps {
            for dep in dep_ids {
                if !deps.contains_key(dep) {
                    issues.push(format!("step '{id}' depends on unknown step '{dep}'"));
                }
            }
        }
        if !issues.is_empty() {
            return Err(EngineError::Validation { issues });
        }

        // Out-degrees follow from the reverse edge direction.
        for dep_ids in deps.values() {
            for dep in dep_ids {
                if let Some(node) = nodes.get_mut(dep) {
                    node.out_degree += 1;
                }
            }
        }

        let dag = Self { nodes, deps, order };
        if let Some(cycle) = dag.find_cycle() {
            return Err(EngineError::CyclicDependency { cycle });
        }
        Ok(dag)
    }

    /// Number of steps in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Step ids in definition order.
    #[must_use]
    pub fn step_ids(&self) -> &[String] {
        &self.order
    }

    /// Looks up a node by step id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    /// Dependencies of `id`; empty for unknown ids.
    #[must_use]
    pub fn deps_of(&self, id: &str) -> &[String] {
        self.deps.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps whose dependencies all lie in `completed` and which are not
    /// themselves in `completed`, in definition order.
    #[must_use]
    pub fn ready_steps(&self, completed: &FxHashSet<String>) -> Vec<&Step> {
        self.order
            .iter()
            .filter(|id| !completed.contains(*id))
            .filter(|id| self.deps_of(id).iter().all(|d| completed.contains(d)))
            .filter_map(|id| self.nodes.get(id).map(|n| &n.step))
            .collect()
    }

    /// Kahn topological ordering of all step ids.
    ///
    /// Dependencies come before dependents. Ties are broken by definition
    /// order, so the result is stable across calls on the same graph.
    #[must_use]
    pub fn topo_sort(&self) -> Vec<String> {
        self.kahn_order()
    }

    fn kahn_order(&self) -> Vec<String> {
        let n = self.order.len();
        let index_of: FxHashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();

        let mut in_degree: Vec<usize> = self
            .order
            .iter()
            .map(|id| self.deps_of(id).len())
            .collect();

        // Dependents per node, derived from the dependency lists.
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (idx, id) in self.order.iter().enumerate() {
            for dep in self.deps_of(id) {
                if let Some(&dep_idx) = index_of.get(dep.as_str()) {
                    dependents[dep_idx].push(idx);
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&idx| in_degree[idx] == 0).collect();
        let mut result = Vec::with_capacity(n);
        while let Some(idx) = queue.pop_front() {
            result.push(self.order[idx].clone());
            // Release dependents in definition order for determinism.
            let mut released = Vec::new();
            for &dependent in &dependents[idx] {
                in_degree[dependent] = in_degree[dependent].saturating_sub(1);
                if in_degree[dependent] == 0 {
                    released.push(dependent);
                }
            }
            released.sort_unstable();
            queue.extend(released);
        }
        result
    }

    /// Recovers one representative cycle, or `None` if the graph is acyclic.
    ///
    /// The returned path visits only nodes absent from the partial Kahn
    /// ordering; its first and last entries coincide.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let visited: FxHashSet<String> = self.kahn_order().into_iter().collect();
        if visited.len() == self.nodes.len() {
            return None;
        }

        // Every unvisited node sits on or feeds a cycle; following
        // unvisited dependencies from any of them must revisit a node.
        let start = self
            .order
            .iter()
            .find(|id| !visited.contains(*id))
            .expect("at least one unvisited node");

        let mut path: Vec<String> = vec![start.clone()];
        let mut seen_at: FxHashMap<String, usize> = FxHashMap::default();
        seen_at.insert(start.clone(), 0);

        let mut current = start.clone();
        loop {
            let next = self
                .deps_of(&current)
                .iter()
                .find(|d| !visited.contains(*d))
                .expect("unvisited node retains an unvisited dependency")
                .clone();
            if let Some(&pos) = seen_at.get(&next) {
                let mut cycle: Vec<String> = path[pos..].to_vec();
                cycle.push(next);
                return Some(cycle);
            }
            seen_at.insert(next.clone(), path.len());
            path.push(next.clone());
            current = next;
        }
    }
}

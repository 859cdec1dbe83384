// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::{TaskId, TaskSpec};
use crate::errors::{NightdagError, Result};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    spec: TaskSpec,
    /// Direct dependents: tasks that list this one in `depends_on`.
    dependents: Vec<TaskId>,
}

/// Validated task graph keyed by task id.
///
/// Construction is the only place where graph shape is checked; once a
/// `DagGraph` exists it is known to be acyclic with every dependency present.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: BTreeMap<TaskId, DagNode>,
    /// Topological order (dependencies first), ties broken by id.
    order: Vec<TaskId>,
}

impl DagGraph {
    /// Build and validate a graph from task specs.
    ///
    /// Rejects duplicate ids, `max_attempts == 0`, unknown or self
    /// dependencies and cycles.
    pub fn build(specs: impl IntoIterator<Item = TaskSpec>) -> Result<Self> {
        let mut nodes: BTreeMap<TaskId, DagNode> = BTreeMap::new();

        // First pass: collect specs, rejecting duplicates.
        for spec in specs {
            if spec.max_attempts == 0 {
                return Err(NightdagError::ConfigError(format!(
                    "task '{}' must allow at least one attempt (max_attempts = 0)",
                    spec.id
                )));
            }
            if nodes.contains_key(&spec.id) {
                return Err(NightdagError::DuplicateTask(spec.id));
            }
            nodes.insert(
                spec.id.clone(),
                DagNode {
                    spec,
                    dependents: Vec::new(),
                },
            );
        }

        if nodes.is_empty() {
            return Err(NightdagError::ConfigError(
                "workflow must contain at least one task".to_string(),
            ));
        }

        // Second pass: check references and populate dependents.
        let edges: Vec<(TaskId, TaskId)> = nodes
            .values()
            .flat_map(|node| {
                node.spec
                    .depends_on
                    .iter()
                    .map(move |dep| (dep.clone(), node.spec.id.clone()))
            })
            .collect();

        for (dep, task) in &edges {
            if dep == task {
                return Err(NightdagError::DagCycle(format!(
                    "task '{}' cannot depend on itself",
                    task
                )));
            }
            match nodes.get_mut(dep) {
                Some(dep_node) => dep_node.dependents.push(task.clone()),
                None => {
                    return Err(NightdagError::UnknownDependency {
                        task: task.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let order = topological_order(&nodes, &edges)?;

        Ok(Self { nodes, order })
    }

    /// Return all task ids in id order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn spec(&self, id: &str) -> Option<&TaskSpec> {
        self.nodes.get(id).map(|n| &n.spec)
    }

    /// Immediate dependencies of a task.
    pub fn dependencies_of(&self, id: &str) -> Option<&BTreeSet<TaskId>> {
        self.nodes.get(id).map(|n| &n.spec.depends_on)
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every task reachable downstream of `id`, excluding `id` itself.
    pub fn transitive_dependents(&self, id: &str) -> Vec<TaskId> {
        let mut stack: Vec<TaskId> = self.dependents_of(id).to_vec();
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut out = Vec::new();

        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            stack.extend(self.dependents_of(&name).iter().cloned());
            out.push(name);
        }

        out.sort();
        out
    }

    /// Topological order, dependencies first.
    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    /// Group tasks into layers: layer `n` holds tasks whose longest
    /// dependency chain has length `n`. Tasks in one layer are independent.
    pub fn execution_layers(&self) -> Vec<Vec<TaskId>> {
        let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
        for id in &self.order {
            let d = self
                .dependencies_of(id)
                .map(|deps| {
                    deps.iter()
                        .filter_map(|dep| depth.get(dep.as_str()))
                        .map(|d| d + 1)
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            depth.insert(id.as_str(), d);
        }

        let mut layers: Vec<Vec<TaskId>> = Vec::new();
        for (id, d) in depth {
            if layers.len() <= d {
                layers.resize_with(d + 1, Vec::new);
            }
            layers[d].push(id.to_string());
        }
        layers
    }
}

fn topological_order(
    nodes: &BTreeMap<TaskId, DagNode>,
    edges: &[(TaskId, TaskId)],
) -> Result<Vec<TaskId>> {
    // Edge direction: dep -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in nodes.keys() {
        graph.add_node(name.as_str());
    }
    for (dep, task) in edges {
        graph.add_edge(dep.as_str(), task.as_str(), ());
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(NightdagError::DagCycle(format!(
            "cycle detected in task DAG involving task '{}'",
            cycle.node_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Vec<TaskSpec> {
        vec![
            TaskSpec::new("A"),
            TaskSpec::new("B"),
            TaskSpec::new("C").after("A").after("B"),
            TaskSpec::new("D").after("C"),
        ]
    }

    #[test]
    fn builds_adjacency_both_ways() {
        let graph = DagGraph::build(diamond()).unwrap();
        assert_eq!(graph.len(), 4);
        assert!(!graph.is_empty());
        assert_eq!(graph.dependents_of("A"), ["C".to_string()]);
        assert_eq!(graph.dependencies_of("C").unwrap().len(), 2);
        assert_eq!(graph.transitive_dependents("A"), vec!["C", "D"]);
        assert!(graph.transitive_dependents("D").is_empty());
    }

    #[test]
    fn layers_follow_longest_chain() {
        let graph = DagGraph::build(diamond()).unwrap();
        assert_eq!(
            graph.execution_layers(),
            vec![vec!["A", "B"], vec!["C"], vec!["D"]]
        );
    }

    #[test]
    fn topological_order_respects_edges() {
        let graph = DagGraph::build(diamond()).unwrap();
        let order = graph.topological_order();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("A") < pos("C"));
        assert!(pos("B") < pos("C"));
        assert!(pos("C") < pos("D"));
    }

    #[test]
    fn rejects_cycle() {
        let err = DagGraph::build(vec![
            TaskSpec::new("A").after("C"),
            TaskSpec::new("B").after("A"),
            TaskSpec::new("C").after("B"),
        ])
        .unwrap_err();
        assert!(matches!(err, NightdagError::DagCycle(_)), "{err:?}");
    }

    #[test]
    fn rejects_self_dependency() {
        let err = DagGraph::build(vec![TaskSpec::new("A").after("A")]).unwrap_err();
        assert!(matches!(err, NightdagError::DagCycle(_)));
    }

    #[test]
    fn rejects_duplicate_and_unknown() {
        let err = DagGraph::build(vec![TaskSpec::new("A"), TaskSpec::new("A")]).unwrap_err();
        assert!(matches!(err, NightdagError::DuplicateTask(id) if id == "A"));

        let err = DagGraph::build(vec![TaskSpec::new("A").after("ghost")]).unwrap_err();
        assert!(matches!(
            err,
            NightdagError::UnknownDependency { ref dependency, .. } if dependency == "ghost"
        ));
    }

    #[test]
    fn rejects_zero_attempts_and_empty() {
        let err = DagGraph::build(vec![TaskSpec::new("A").max_attempts(0)]).unwrap_err();
        assert!(matches!(err, NightdagError::ConfigError(_)));
        assert!(DagGraph::build(Vec::new()).is_err());
    }
}

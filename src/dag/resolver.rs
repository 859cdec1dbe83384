// src/dag/resolver.rs

//! Dependency resolution over per-run task state.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::dag::{DagGraph, TaskId, TaskState, TaskStatus};
use crate::errors::Result;

/// Every `Pending` task whose whole `depends_on` set has `Succeeded`.
///
/// This is the canonical dependency satisfaction check: a dependency that
/// is in any other status, including `Failed` or `Skipped`, blocks the task.
pub fn ready_frontier(
    graph: &DagGraph,
    states: &BTreeMap<TaskId, TaskState>,
) -> BTreeSet<TaskId> {
    states
        .values()
        .filter(|state| state.status == TaskStatus::Pending)
        .filter(|state| deps_succeeded(graph, states, &state.task_id))
        .map(|state| state.task_id.clone())
        .collect()
}

fn deps_succeeded(graph: &DagGraph, states: &BTreeMap<TaskId, TaskState>, task: &str) -> bool {
    let Some(deps) = graph.dependencies_of(task) else {
        warn!(task = %task, "task missing from graph");
        return false;
    };

    deps.iter().all(|dep| match states.get(dep) {
        Some(state) => state.status == TaskStatus::Succeeded,
        None => {
            warn!(task = %task, dep = %dep, "dependency missing from run state");
            false
        }
    })
}

/// Mutating view used by the engine to apply resolver decisions.
pub struct Resolver<'a> {
    graph: &'a DagGraph,
    states: &'a mut BTreeMap<TaskId, TaskState>,
}

impl<'a> Resolver<'a> {
    pub fn new(graph: &'a DagGraph, states: &'a mut BTreeMap<TaskId, TaskState>) -> Self {
        Self { graph, states }
    }

    /// Collect the frontier and move those tasks `Pending -> Ready`.
    ///
    /// Returns the ids that were promoted, in id order.
    pub fn promote_ready(&mut self) -> Result<Vec<TaskId>> {
        let frontier = ready_frontier(self.graph, self.states);

        for id in &frontier {
            if let Some(state) = self.states.get_mut(id) {
                debug!(task = %id, "dependencies satisfied; marking Ready");
                state.transition(TaskStatus::Ready)?;
            }
        }

        Ok(frontier.into_iter().collect())
    }

    /// Mark every transitive dependent of `failed_task` that has not started
    /// as `Skipped`.
    ///
    /// Returns the newly skipped ids (excluding `failed_task` itself).
    pub fn mark_dependents_skipped(&mut self, failed_task: &str) -> Result<Vec<TaskId>> {
        let mut newly_skipped = Vec::new();

        for id in self.graph.transitive_dependents(failed_task) {
            if let Some(state) = self.states.get_mut(&id) {
                match state.status {
                    TaskStatus::Pending | TaskStatus::Ready => {
                        debug!(
                            task = %id,
                            upstream = %failed_task,
                            "marking dependent Skipped due to upstream failure"
                        );
                        state.transition(TaskStatus::Skipped)?;
                        newly_skipped.push(id);
                    }
                    TaskStatus::Running => {
                        // Dependents are never dispatched before their deps
                        // succeed, so this is a broken invariant upstream.
                        warn!(
                            task = %id,
                            upstream = %failed_task,
                            "dependent of failed task is Running; leaving it alone"
                        );
                    }
                    TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped => {}
                }
            }
        }

        Ok(newly_skipped)
    }
}

// src/dag/mod.rs

//! DAG representation and dependency resolution.
//!
//! - [`spec`] holds the immutable per-task description.
//! - [`state`] holds the mutable per-run records (`TaskState`, `RunRecord`)
//!   and the workflow-level state machine enum.
//! - [`graph`] holds the validated adjacency structure; building it is where
//!   cycles, duplicates and unknown dependencies are rejected.
//! - [`resolver`] computes the ready frontier and propagates skips through
//!   dependents of failed tasks.

pub mod graph;
pub mod resolver;
pub mod spec;
pub mod state;

pub use graph::DagGraph;
pub use resolver::{ready_frontier, Resolver};
pub use spec::TaskSpec;
pub use state::{
    FailureKind, RunRecord, TaskFailure, TaskState, TaskStatus, WorkflowState,
};

/// Canonical task id type used throughout the crate.
pub type TaskId = String;

/// Identifier of one execution of a workflow.
pub type RunId = String;

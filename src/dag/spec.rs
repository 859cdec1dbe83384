// src/dag/spec.rs

//! Immutable description of one unit of work.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::dag::TaskId;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Static task information: id, dependencies, failure policy and limits.
///
/// The executor for the task is registered separately on the
/// [`WorkflowDefinition`](crate::engine::WorkflowDefinition), keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub id: TaskId,
    /// Tasks that must have Succeeded before this one may run.
    pub depends_on: BTreeSet<TaskId>,
    /// Whether a terminal failure of this task aborts the whole run.
    pub fatal: bool,
    /// Total attempts allowed, including the first one. Always >= 1 once validated.
    pub max_attempts: u32,
    /// Deadline for a single attempt.
    pub timeout: Duration,
}

impl TaskSpec {
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            depends_on: BTreeSet::new(),
            fatal: true,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn after(mut self, dep: impl Into<TaskId>) -> Self {
        self.depends_on.insert(dep.into());
        self
    }

    pub fn fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// src/dag/state.rs

//! Per-run mutable state for tasks and for the workflow as a whole.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{RunId, TaskId};
use crate::errors::{NightdagError, Result};

/// Status of a task within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting on dependencies.
    Pending,
    /// Dependencies satisfied (or a retry was scheduled); waiting for a slot.
    Ready,
    /// An attempt has been dispatched to a worker.
    Running,
    Succeeded,
    Failed,
    /// Never ran because an upstream task ended Failed or Skipped.
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Legal task transitions within a run.
    ///
    /// `Running -> Ready` is the only regression and only happens when a
    /// retry is scheduled.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Ready, Running)
                | (Ready, Skipped)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Ready)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Ready => "Ready",
            TaskStatus::Running => "Running",
            TaskStatus::Succeeded => "Succeeded",
            TaskStatus::Failed => "Failed",
            TaskStatus::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The task body returned an error.
    Execution,
    /// The attempt exceeded `TaskSpec::timeout`.
    Timeout,
    /// The attempt was interrupted by a workflow stop.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Execution => "execution",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Mutable per-run record of one task. Persisted after every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Number of attempts dispatched so far in this run.
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_error: Option<TaskFailure>,
}

impl TaskState {
    pub fn pending(task_id: impl Into<TaskId>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            attempt: 0,
            started_at: None,
            ended_at: None,
            last_error: None,
        }
    }

    /// Move to `to`, rejecting edges the task state machine does not have.
    pub fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(NightdagError::InvalidTaskTransition {
                task: self.task_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Put an unfinished task back to a fresh `Pending` for a resumed run.
    ///
    /// Succeeded tasks are left alone. Everything else, including a task that
    /// was `Running` when the process died, gets a new attempt budget.
    pub fn reset_for_resume(&mut self) -> bool {
        if self.status == TaskStatus::Succeeded {
            return false;
        }
        *self = TaskState::pending(std::mem::take(&mut self.task_id));
        true
    }
}

/// Workflow-level state machine.
///
/// `Created -> Initialized -> Ready -> Running -> {Completed | Failed}`, with
/// `Running <-> Paused` and `Shutdown` reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    Created,
    Initialized,
    Ready,
    Running,
    Paused,
    Completed,
    Failed,
    Shutdown,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Shutdown
        )
    }

    pub fn can_transition_to(self, to: WorkflowState) -> bool {
        use WorkflowState::*;
        if to == Shutdown {
            return self != Shutdown;
        }
        matches!(
            (self, to),
            (Created, Initialized)
                | (Initialized, Ready)
                | (Ready, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Paused, Completed)
                | (Paused, Failed)
        )
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// All state for one execution of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub workflow_state: WorkflowState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub task_states: BTreeMap<TaskId, TaskState>,
}

impl RunRecord {
    /// Fresh record with every task `Pending`.
    pub fn new<I, S>(run_id: impl Into<RunId>, task_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        let task_states = task_ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                (id.clone(), TaskState::pending(id))
            })
            .collect();

        Self {
            run_id: run_id.into(),
            workflow_state: WorkflowState::Created,
            started_at: Utc::now(),
            ended_at: None,
            task_states,
        }
    }

    /// Move the workflow state, rejecting edges the state machine does not have.
    pub fn transition(&mut self, to: WorkflowState) -> Result<()> {
        let from = self.workflow_state;
        if !from.can_transition_to(to) {
            return Err(NightdagError::InvalidTransition { from, to });
        }
        self.workflow_state = to;
        if to.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Rewind a reloaded record so it can go through `initialize()` again.
    ///
    /// Returns the ids of tasks that were reset to `Pending`.
    pub fn prepare_resume(&mut self) -> Vec<TaskId> {
        self.workflow_state = WorkflowState::Created;
        self.ended_at = None;
        self.task_states
            .values_mut()
            .filter_map(|state| {
                let id = state.task_id.clone();
                state.reset_for_resume().then_some(id)
            })
            .collect()
    }

    pub fn status_of(&self, task: &str) -> Option<TaskStatus> {
        self.task_states.get(task).map(|s| s.status)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.task_states
            .values()
            .filter(|s| s.status == status)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_only_regresses_to_ready() {
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Ready));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Succeeded.can_transition_to(TaskStatus::Ready));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Running));
    }

    #[test]
    fn task_transition_rejects_illegal_edges() {
        let mut state = TaskState::pending("A");
        state.transition(TaskStatus::Ready).unwrap();
        state.transition(TaskStatus::Running).unwrap();
        state.transition(TaskStatus::Ready).unwrap();
        state.transition(TaskStatus::Running).unwrap();
        state.transition(TaskStatus::Succeeded).unwrap();

        let err = state.transition(TaskStatus::Running).unwrap_err();
        assert!(matches!(
            err,
            NightdagError::InvalidTaskTransition {
                from: TaskStatus::Succeeded,
                to: TaskStatus::Running,
                ..
            }
        ));
        assert_eq!(state.status, TaskStatus::Succeeded);

        let mut pending = TaskState::pending("B");
        assert!(pending.transition(TaskStatus::Running).is_err());
        assert_eq!(pending.status, TaskStatus::Pending);
    }

    #[test]
    fn workflow_happy_path_and_pause() {
        let mut record = RunRecord::new("r1", ["A"]);
        record.transition(WorkflowState::Initialized).unwrap();
        record.transition(WorkflowState::Ready).unwrap();
        record.transition(WorkflowState::Running).unwrap();
        record.transition(WorkflowState::Paused).unwrap();
        record.transition(WorkflowState::Running).unwrap();
        record.transition(WorkflowState::Completed).unwrap();
        assert!(record.ended_at.is_some());
    }

    #[test]
    fn shutdown_reachable_from_anywhere_but_itself() {
        for state in [
            WorkflowState::Created,
            WorkflowState::Initialized,
            WorkflowState::Ready,
            WorkflowState::Running,
            WorkflowState::Paused,
            WorkflowState::Completed,
            WorkflowState::Failed,
        ] {
            assert!(state.can_transition_to(WorkflowState::Shutdown), "{state:?}");
        }
        assert!(!WorkflowState::Shutdown.can_transition_to(WorkflowState::Shutdown));
    }

    #[test]
    fn invalid_transition_is_an_error() {
        let mut record = RunRecord::new("r1", ["A"]);
        let err = record.transition(WorkflowState::Running).unwrap_err();
        assert!(matches!(
            err,
            NightdagError::InvalidTransition {
                from: WorkflowState::Created,
                to: WorkflowState::Running
            }
        ));
    }

    #[test]
    fn resume_reset_keeps_succeeded() {
        let mut done = TaskState::pending("A");
        done.status = TaskStatus::Succeeded;
        done.attempt = 1;
        assert!(!done.reset_for_resume());
        assert_eq!(done.status, TaskStatus::Succeeded);

        let mut interrupted = TaskState::pending("B");
        interrupted.status = TaskStatus::Running;
        interrupted.attempt = 2;
        assert!(interrupted.reset_for_resume());
        assert_eq!(interrupted, TaskState::pending("B"));
    }
}

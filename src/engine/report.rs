// src/engine/report.rs

//! Final, user-facing summary of a run.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dag::{DagGraph, RunId, RunRecord, TaskFailure, TaskId, TaskStatus, WorkflowState};
use crate::types::format_duration;

/// Terminal view of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub attempts: u32,
    pub fatal: bool,
    pub last_error: Option<TaskFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Every task's status, the non-fatal failures, and the fatal cause, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow_state: WorkflowState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// In topological order when built with a graph, id order otherwise.
    pub tasks: Vec<TaskReport>,
    /// The fatal task whose failure aborted the run.
    pub fatal_cause: Option<TaskId>,
}

impl RunReport {
    /// Build a report from a run record. `graph` supplies the fatal flag and
    /// ordering; tasks unknown to it are reported as non-fatal.
    pub fn from_record(record: &RunRecord, graph: Option<&DagGraph>) -> Self {
        let fatal_of = |id: &str| {
            graph
                .and_then(|g| g.spec(id))
                .map(|s| s.fatal)
                .unwrap_or(false)
        };

        let mut order: Vec<&TaskId> = match graph {
            Some(g) => g
                .topological_order()
                .iter()
                .filter(|id| record.task_states.contains_key(*id))
                .collect(),
            None => Vec::new(),
        };
        for id in record.task_states.keys() {
            if !order.contains(&id) {
                order.push(id);
            }
        }

        let tasks: Vec<TaskReport> = order
            .into_iter()
            .filter_map(|id| record.task_states.get(id))
            .map(|s| TaskReport {
                task_id: s.task_id.clone(),
                status: s.status,
                attempts: s.attempt,
                fatal: fatal_of(&s.task_id),
                last_error: s.last_error.clone(),
                started_at: s.started_at,
                ended_at: s.ended_at,
            })
            .collect();

        let fatal_cause = tasks
            .iter()
            .filter(|t| t.fatal && t.status == TaskStatus::Failed)
            .min_by_key(|t| t.ended_at)
            .map(|t| t.task_id.clone());

        Self {
            run_id: record.run_id.clone(),
            workflow_state: record.workflow_state,
            started_at: record.started_at,
            ended_at: record.ended_at,
            tasks,
            fatal_cause,
        }
    }

    pub fn task(&self, id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task_id == id)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Failed tasks that did not abort the run.
    pub fn non_fatal_failures(&self) -> Vec<&TaskReport> {
        self.tasks
            .iter()
            .filter(|t| !t.fatal && t.status == TaskStatus::Failed)
            .collect()
    }

    pub fn skipped(&self) -> Vec<&TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Skipped)
            .map(|t| &t.task_id)
            .collect()
    }

    /// Share of tasks that succeeded, in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        self.count(TaskStatus::Succeeded) as f64 / self.tasks.len() as f64
    }

    pub fn duration(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    pub fn is_completed(&self) -> bool {
        self.workflow_state == WorkflowState::Completed
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "run {}: {} in {} ({}/{} succeeded)",
            self.run_id,
            self.workflow_state,
            format_duration(Duration::from_secs(self.duration().as_secs())),
            self.count(TaskStatus::Succeeded),
            self.tasks.len()
        )?;

        for t in &self.tasks {
            write!(f, "  {:<24} {:<9} attempts={}", t.task_id, t.status, t.attempts)?;
            if !t.fatal {
                write!(f, " non-fatal")?;
            }
            if t.status == TaskStatus::Failed {
                if let Some(err) = &t.last_error {
                    write!(f, " error=\"{err}\"")?;
                }
            }
            writeln!(f)?;
        }

        if let Some(cause) = &self.fatal_cause {
            writeln!(f, "aborted by fatal task '{cause}'")?;
            let skipped = self.skipped();
            if !skipped.is_empty() {
                let names: Vec<&str> = skipped.iter().map(|s| s.as_str()).collect();
                writeln!(f, "skipped: {}", names.join(", "))?;
            }
        }

        let non_fatal = self.non_fatal_failures();
        if !non_fatal.is_empty() {
            let names: Vec<&str> = non_fatal.iter().map(|t| t.task_id.as_str()).collect();
            writeln!(f, "non-fatal failures: {}", names.join(", "))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{FailureKind, TaskSpec};

    fn graph() -> DagGraph {
        DagGraph::build(vec![
            TaskSpec::new("A"),
            TaskSpec::new("B").fatal(false),
            TaskSpec::new("C").after("A"),
            TaskSpec::new("D").after("C"),
        ])
        .unwrap()
    }

    fn record() -> RunRecord {
        let mut r = RunRecord::new("r", ["A", "B", "C", "D"]);
        r.workflow_state = WorkflowState::Failed;
        let now = Utc::now();
        for (id, status) in [
            ("A", TaskStatus::Failed),
            ("B", TaskStatus::Failed),
            ("C", TaskStatus::Skipped),
            ("D", TaskStatus::Skipped),
        ] {
            let s = r.task_states.get_mut(id).unwrap();
            s.status = status;
            s.ended_at = Some(now);
            if status == TaskStatus::Failed {
                s.attempt = 3;
                s.last_error = Some(TaskFailure {
                    kind: FailureKind::Execution,
                    message: "boom".to_string(),
                });
            }
        }
        r
    }

    #[test]
    fn names_fatal_cause_skips_and_non_fatal_failures() {
        let report = RunReport::from_record(&record(), Some(&graph()));
        assert_eq!(report.fatal_cause.as_deref(), Some("A"));
        assert_eq!(report.skipped(), vec!["C", "D"]);
        let non_fatal: Vec<&str> = report
            .non_fatal_failures()
            .iter()
            .map(|t| t.task_id.as_str())
            .collect();
        assert_eq!(non_fatal, vec!["B"]);
        assert_eq!(report.success_rate(), 0.0);

        let text = report.to_string();
        assert!(text.contains("aborted by fatal task 'A'"), "{text}");
        assert!(text.contains("skipped: C, D"), "{text}");
        assert!(text.contains("non-fatal failures: B"), "{text}");
    }

    #[test]
    fn without_graph_every_task_is_non_fatal() {
        let report = RunReport::from_record(&record(), None);
        assert!(report.fatal_cause.is_none());
        assert_eq!(report.non_fatal_failures().len(), 2);
        let ids: Vec<&str> = report.tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
    }
}

// src/metrics.rs

//! Metrics side channel.
//!
//! The engine only ever talks to a [`MetricsSink`]: once per task when it
//! reaches a terminal status, and once with the run summary. Where the
//! numbers end up is the sink's business.

use std::collections::BTreeMap;
use std::fmt::Debug;

use tracing::info;

use crate::dag::{TaskState, TaskStatus};
use crate::engine::RunReport;

pub const TASK_DURATION_MS: &str = "nightdag.task.duration_ms";
pub const TASK_ATTEMPTS: &str = "nightdag.task.attempts";
pub const TASK_OUTCOME: &str = "nightdag.task.outcome";
pub const RUN_DURATION_MS: &str = "nightdag.run.duration_ms";
pub const RUN_SUCCESS_RATE: &str = "nightdag.run.success_rate";
pub const RUN_TASKS: &str = "nightdag.run.tasks";

pub type Tags = BTreeMap<String, String>;

/// Receiver of named measurements.
///
/// Implementations must not block; a sink that fails should log and drop the
/// measurement rather than disturb the run.
pub trait MetricsSink: Send + Sync + Debug {
    fn report(&self, name: &str, value: f64, tags: &Tags);
}

/// Emits every measurement as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn report(&self, name: &str, value: f64, tags: &Tags) {
        info!(target: "nightdag::metrics", metric = name, value, ?tags, "metric");
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn report(&self, _name: &str, _value: f64, _tags: &Tags) {}
}

/// Report a task that just reached a terminal status.
pub fn report_task(sink: &dyn MetricsSink, run_id: &str, fatal: bool, state: &TaskState) {
    let mut tags = Tags::new();
    tags.insert("run_id".to_string(), run_id.to_string());
    tags.insert("task".to_string(), state.task_id.clone());
    tags.insert("status".to_string(), state.status.to_string());
    tags.insert("fatal".to_string(), fatal.to_string());
    if let Some(err) = &state.last_error {
        tags.insert("error_kind".to_string(), err.kind.to_string());
    }

    sink.report(TASK_OUTCOME, 1.0, &tags);
    sink.report(TASK_ATTEMPTS, f64::from(state.attempt), &tags);

    if let (Some(start), Some(end)) = (state.started_at, state.ended_at) {
        let ms = (end - start).num_milliseconds().max(0);
        sink.report(TASK_DURATION_MS, ms as f64, &tags);
    }
}

/// Report the run summary.
pub fn report_run(sink: &dyn MetricsSink, report: &RunReport) {
    let mut tags = Tags::new();
    tags.insert("run_id".to_string(), report.run_id.clone());
    tags.insert("workflow_state".to_string(), report.workflow_state.to_string());

    sink.report(RUN_DURATION_MS, report.duration().as_millis() as f64, &tags);
    sink.report(RUN_SUCCESS_RATE, report.success_rate(), &tags);

    for status in [
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Skipped,
        TaskStatus::Pending,
        TaskStatus::Ready,
        TaskStatus::Running,
    ] {
        let n = report.count(status);
        if n == 0 && !status.is_terminal() {
            continue;
        }
        let mut tags = tags.clone();
        tags.insert("status".to_string(), status.to_string());
        sink.report(RUN_TASKS, n as f64, &tags);
    }
}

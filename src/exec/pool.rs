// src/exec/pool.rs

//! Worker slots for dispatched attempts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::{RunId, TaskId, TaskSpec};
use crate::engine::RuntimeEvent;
use crate::errors::{NightdagError, Result};
use crate::exec::runner::run_attempt;
use crate::exec::task::{TaskContext, TaskError, TaskExecutor};

/// An attempt the engine wants a worker slot to run now.
#[derive(Debug, Clone)]
pub struct ScheduledAttempt {
    pub run_id: RunId,
    pub spec: TaskSpec,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Retry backoff served inside the slot before the body runs.
    pub delay: Duration,
}

/// Result of one attempt, reported back to the engine loop.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub task_id: TaskId,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub result: std::result::Result<(), TaskError>,
}

impl AttemptReport {
    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at).to_std().unwrap_or_default()
    }
}

/// Owns the Tokio tasks running attempts.
///
/// Workers never mutate run state: each one sends exactly one
/// [`RuntimeEvent::AttemptFinished`] and exits. At most one attempt per task
/// id is in flight at a time.
pub struct WorkerPool {
    executors: HashMap<TaskId, Arc<dyn TaskExecutor>>,
    results_tx: mpsc::Sender<RuntimeEvent>,
    cancel: CancellationToken,
    active: HashMap<TaskId, JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        executors: HashMap<TaskId, Arc<dyn TaskExecutor>>,
        results_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            executors,
            results_tx,
            cancel: CancellationToken::new(),
            active: HashMap::new(),
        }
    }

    /// Spawn a worker for `scheduled`.
    pub fn dispatch(&mut self, scheduled: ScheduledAttempt) -> Result<()> {
        let task_id = scheduled.spec.id.clone();

        if self.active.contains_key(&task_id) {
            warn!(task = %task_id, "attempt already in flight; refusing duplicate dispatch");
            return Ok(());
        }

        let executor = self
            .executors
            .get(&task_id)
            .cloned()
            .ok_or_else(|| NightdagError::MissingExecutor(task_id.clone()))?;

        let tx = self.results_tx.clone();
        let cancel = self.cancel.child_token();

        info!(
            task = %task_id,
            run_id = %scheduled.run_id,
            attempt = scheduled.attempt,
            delay_ms = scheduled.delay.as_millis() as u64,
            "dispatching attempt"
        );

        let handle = tokio::spawn(async move {
            let report = run_worker(executor, scheduled, cancel).await;
            let task = report.task_id.clone();
            if tx.send(RuntimeEvent::AttemptFinished(report)).await.is_err() {
                debug!(task = %task, "engine gone before attempt result was delivered");
            }
        });

        self.active.insert(task_id, handle);
        Ok(())
    }

    /// Forget the worker for `task` once its result has been received.
    pub fn reap(&mut self, task: &str) {
        self.active.remove(task);
    }

    /// Ask every in-flight body to stop.
    pub fn cancel_all(&self) {
        if !self.active.is_empty() {
            info!(in_flight = self.active.len(), "cancelling in-flight attempts");
        }
        self.cancel.cancel();
    }

    /// Abort workers that did not finish within the grace period.
    ///
    /// Returns the ids of the abandoned tasks.
    pub fn abort_all(&mut self) -> Vec<TaskId> {
        let mut abandoned: Vec<TaskId> = Vec::new();
        for (task, handle) in self.active.drain() {
            if !handle.is_finished() {
                warn!(task = %task, "worker did not stop within grace period; aborting");
                handle.abort();
                abandoned.push(task);
            }
        }
        abandoned.sort();
        abandoned
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel.cancel();
        for handle in self.active.values() {
            handle.abort();
        }
    }
}

async fn run_worker(
    executor: Arc<dyn TaskExecutor>,
    scheduled: ScheduledAttempt,
    cancel: CancellationToken,
) -> AttemptReport {
    let ScheduledAttempt {
        run_id,
        spec,
        attempt,
        delay,
    } = scheduled;

    if !delay.is_zero() {
        tokio::select! {
            _ = cancel.cancelled() => {
                let now = Utc::now();
                return AttemptReport {
                    task_id: spec.id,
                    attempt,
                    started_at: now,
                    ended_at: now,
                    result: Err(TaskError::Cancelled),
                };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    let ctx = TaskContext {
        run_id,
        task_id: spec.id.clone(),
        attempt,
        cancel,
    };

    let started_at = Utc::now();
    let result = run_attempt(executor.as_ref(), ctx, spec.timeout).await;
    let ended_at = Utc::now();

    AttemptReport {
        task_id: spec.id,
        attempt,
        started_at,
        ended_at,
        result,
    }
}

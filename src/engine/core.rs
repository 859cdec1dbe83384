// src/engine/core.rs

//! Pure core engine state machine.
//!
//! This module contains a synchronous, deterministic "core engine" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated [`RunRecord`]
//! - a list of [`CoreCommand`]s describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::WorkflowEngine`) is
//! responsible for:
//! - reading events from the channel
//! - writing checkpoints (in command order, before anything later runs)
//! - handing [`ScheduledAttempt`]s to the worker pool
//! - the shutdown grace period
//!
//! The core is the only mutator of task state and is unit tested without
//! any Tokio, channels, filesystem, or processes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::checkpoint::RunHeader;
use crate::dag::{DagGraph, Resolver, RunRecord, TaskId, TaskState, TaskStatus, WorkflowState};
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::exec::{AttemptReport, ScheduledAttempt, TaskError};
use crate::retry::RetryPolicy;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Durably record a task state before executing any later command.
    Checkpoint(TaskState),
    /// Durably record the workflow-level state.
    SaveRun(RunHeader),
    /// Start an attempt in a worker slot.
    Dispatch(ScheduledAttempt),
    /// A task reached a terminal status (for metrics).
    TaskTerminal { state: TaskState, fatal: bool },
    /// Ask in-flight attempts to stop and start the grace period.
    CancelInFlight,
    /// The run reached this terminal workflow state.
    Finish(WorkflowState),
}

/// Decision returned by the core after handling one input.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn continuing(commands: Vec<CoreCommand>) -> Self {
        let keep_running = !commands
            .iter()
            .any(|c| matches!(c, CoreCommand::Finish(_)));
        Self {
            commands,
            keep_running,
        }
    }
}

/// Pure core engine state.
///
/// Owns the validated graph and the run record. It has **no** channels, no
/// Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreEngine {
    graph: DagGraph,
    record: RunRecord,
    retry: Arc<dyn RetryPolicy>,
    max_parallel: usize,
    /// Tasks with an attempt out in a worker slot.
    in_flight: BTreeSet<TaskId>,
    /// Backoff owed by the next attempt of a task waiting on a retry.
    retry_delays: BTreeMap<TaskId, Duration>,
    /// First fatal task that ended Failed; once set nothing new is dispatched.
    fatal_cause: Option<TaskId>,
    shutting_down: bool,
}

impl CoreEngine {
    /// `record` must be in `Ready` and hold a state for every graph task.
    pub fn new(
        graph: DagGraph,
        record: RunRecord,
        retry: Arc<dyn RetryPolicy>,
        max_parallel: usize,
    ) -> Self {
        Self {
            graph,
            record,
            retry,
            max_parallel: max_parallel.max(1),
            in_flight: BTreeSet::new(),
            retry_delays: BTreeMap::new(),
            fatal_cause: None,
            shutting_down: false,
        }
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn workflow_state(&self) -> WorkflowState {
        self.record.workflow_state
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn fatal_cause(&self) -> Option<&str> {
        self.fatal_cause.as_deref()
    }

    /// `Ready -> Running`, then dispatch the first frontier.
    pub fn start(&mut self) -> Result<CoreStep> {
        self.record.transition(WorkflowState::Running)?;
        info!(
            run_id = %self.record.run_id,
            tasks = self.graph.len(),
            max_parallel = self.max_parallel,
            "run started"
        );

        let mut commands = vec![self.save_run()];
        commands.extend(self.advance()?);
        Ok(CoreStep::continuing(commands))
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> Result<CoreStep> {
        let commands = match event {
            RuntimeEvent::AttemptFinished(report) => self.on_attempt_finished(report)?,
            RuntimeEvent::PauseRequested => self.on_pause()?,
            RuntimeEvent::UnpauseRequested => self.on_unpause()?,
            RuntimeEvent::ShutdownRequested => self.on_shutdown()?,
        };
        Ok(CoreStep::continuing(commands))
    }

    /// Forget attempts abandoned after the shutdown grace period and end the
    /// run in `Shutdown`.
    ///
    /// Abandoned tasks stay `Running` in the record; resume re-attempts them.
    pub fn abandon(&mut self, tasks: &[TaskId]) -> Result<CoreStep> {
        for task in tasks {
            if self.in_flight.remove(task) {
                warn!(task = %task, "attempt abandoned after shutdown grace period");
            }
        }
        self.in_flight.clear();
        let commands = self.finish(WorkflowState::Shutdown)?;
        Ok(CoreStep::continuing(commands))
    }

    fn on_attempt_finished(&mut self, report: AttemptReport) -> Result<Vec<CoreCommand>> {
        let task = report.task_id.clone();

        if !self.in_flight.remove(&task) {
            warn!(task = %task, attempt = report.attempt, "result for task not in flight; ignoring");
            return Ok(Vec::new());
        }

        let Some(spec) = self.graph.spec(&task).cloned() else {
            warn!(task = %task, "result for unknown task; ignoring");
            return Ok(Vec::new());
        };
        let Some(state) = self.record.task_states.get_mut(&task) else {
            warn!(task = %task, "result for task without state; ignoring");
            return Ok(Vec::new());
        };

        if state.status != TaskStatus::Running || state.attempt != report.attempt {
            warn!(
                task = %task,
                status = %state.status,
                attempt = state.attempt,
                reported_attempt = report.attempt,
                "stale attempt result; ignoring"
            );
            return Ok(Vec::new());
        }

        let mut commands = Vec::new();

        match &report.result {
            Ok(()) => {
                info!(
                    task = %task,
                    attempt = report.attempt,
                    duration_ms = report.duration().as_millis() as u64,
                    "task succeeded"
                );
                state.transition(TaskStatus::Succeeded)?;
                state.ended_at = Some(report.ended_at);
                state.last_error = None;
                commands.push(CoreCommand::Checkpoint(state.clone()));
                commands.push(CoreCommand::TaskTerminal {
                    state: state.clone(),
                    fatal: spec.fatal,
                });
            }

            Err(TaskError::Cancelled) if self.shutting_down => {
                // Left Running on purpose: resume treats it as unverified.
                debug!(task = %task, attempt = report.attempt, "attempt cancelled by shutdown");
            }

            Err(err) => {
                state.last_error = Some(err.into());

                let may_retry = self.fatal_cause.is_none() && !self.shutting_down;
                if may_retry && self.retry.should_retry(state, &spec) {
                    let delay = self.retry.backoff(state.attempt);
                    warn!(
                        task = %task,
                        attempt = state.attempt,
                        max_attempts = spec.max_attempts,
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "attempt failed; retry scheduled"
                    );
                    state.transition(TaskStatus::Ready)?;
                    self.retry_delays.insert(task.clone(), delay);
                    commands.push(CoreCommand::Checkpoint(state.clone()));
                } else {
                    state.transition(TaskStatus::Failed)?;
                    state.ended_at = Some(report.ended_at);
                    commands.push(CoreCommand::Checkpoint(state.clone()));
                    commands.push(CoreCommand::TaskTerminal {
                        state: state.clone(),
                        fatal: spec.fatal,
                    });

                    if spec.fatal {
                        error!(
                            task = %task,
                            attempts = state.attempt,
                            error = %err,
                            "fatal task failed; aborting run"
                        );
                        if self.fatal_cause.is_none() {
                            self.fatal_cause = Some(task.clone());
                        }
                    } else {
                        warn!(
                            task = %task,
                            attempts = state.attempt,
                            error = %err,
                            "non-fatal task failed; continuing"
                        );
                    }

                    commands.extend(self.skip_dependents(&task)?);
                }
            }
        }

        commands.extend(self.advance()?);
        Ok(commands)
    }

    fn on_pause(&mut self) -> Result<Vec<CoreCommand>> {
        if self.record.workflow_state != WorkflowState::Running || self.shutting_down {
            debug!(state = %self.record.workflow_state, "pause ignored");
            return Ok(Vec::new());
        }
        self.record.transition(WorkflowState::Paused)?;
        info!(run_id = %self.record.run_id, in_flight = self.in_flight.len(), "run paused");
        Ok(vec![self.save_run()])
    }

    fn on_unpause(&mut self) -> Result<Vec<CoreCommand>> {
        if self.record.workflow_state != WorkflowState::Paused || self.shutting_down {
            debug!(state = %self.record.workflow_state, "unpause ignored");
            return Ok(Vec::new());
        }
        self.record.transition(WorkflowState::Running)?;
        info!(run_id = %self.record.run_id, "run resumed from pause");
        let mut commands = vec![self.save_run()];
        commands.extend(self.advance()?);
        Ok(commands)
    }

    fn on_shutdown(&mut self) -> Result<Vec<CoreCommand>> {
        if self.shutting_down || self.record.workflow_state.is_terminal() {
            return Ok(Vec::new());
        }
        self.shutting_down = true;
        info!(
            run_id = %self.record.run_id,
            in_flight = self.in_flight.len(),
            "shutdown requested"
        );

        if self.in_flight.is_empty() {
            return self.finish(WorkflowState::Shutdown);
        }
        Ok(vec![CoreCommand::CancelInFlight])
    }

    /// Promote, dispatch, and detect the end of the run.
    fn advance(&mut self) -> Result<Vec<CoreCommand>> {
        let mut commands = Vec::new();

        if self.shutting_down {
            if self.in_flight.is_empty() {
                commands.extend(self.finish(WorkflowState::Shutdown)?);
            }
            return Ok(commands);
        }

        if self.fatal_cause.is_none() {
            let promoted = Resolver::new(&self.graph, &mut self.record.task_states).promote_ready()?;
            for id in promoted {
                if let Some(state) = self.record.task_states.get(&id) {
                    commands.push(CoreCommand::Checkpoint(state.clone()));
                }
            }

            if self.record.workflow_state == WorkflowState::Running {
                commands.extend(self.dispatch_ready()?);
            }
        }

        if !self.in_flight.is_empty() {
            return Ok(commands);
        }

        if self.fatal_cause.is_some() {
            commands.extend(self.skip_remaining()?);
            commands.extend(self.finish(WorkflowState::Failed)?);
            return Ok(commands);
        }

        let waiting = self
            .record
            .task_states
            .values()
            .any(|s| s.status == TaskStatus::Ready);
        if waiting {
            // Paused with work left.
            return Ok(commands);
        }

        // Nothing Ready, nothing in flight: any Pending task left is blocked.
        commands.extend(self.skip_remaining()?);
        commands.extend(self.finish(WorkflowState::Completed)?);
        Ok(commands)
    }

    fn dispatch_ready(&mut self) -> Result<Vec<CoreCommand>> {
        let mut commands = Vec::new();

        let ready: Vec<TaskId> = self
            .record
            .task_states
            .values()
            .filter(|s| s.status == TaskStatus::Ready && !self.in_flight.contains(&s.task_id))
            .map(|s| s.task_id.clone())
            .collect();

        for id in ready {
            if self.in_flight.len() >= self.max_parallel {
                break;
            }
            let Some(spec) = self.graph.spec(&id).cloned() else {
                continue;
            };
            let Some(state) = self.record.task_states.get_mut(&id) else {
                continue;
            };

            state.transition(TaskStatus::Running)?;
            state.attempt += 1;
            if state.started_at.is_none() {
                state.started_at = Some(Utc::now());
            }

            let scheduled = ScheduledAttempt {
                run_id: self.record.run_id.clone(),
                attempt: state.attempt,
                delay: self.retry_delays.remove(&id).unwrap_or_default(),
                spec,
            };
            debug!(task = %id, attempt = state.attempt, "task Ready -> Running");

            commands.push(CoreCommand::Checkpoint(state.clone()));
            commands.push(CoreCommand::Dispatch(scheduled));
            self.in_flight.insert(id);
        }

        Ok(commands)
    }

    fn skip_dependents(&mut self, failed: &str) -> Result<Vec<CoreCommand>> {
        let skipped =
            Resolver::new(&self.graph, &mut self.record.task_states).mark_dependents_skipped(failed)?;
        if !skipped.is_empty() {
            info!(upstream = %failed, skipped = ?skipped, "dependents skipped");
        }
        Ok(self.skipped_commands(skipped))
    }

    /// Skip every task that never got to run.
    fn skip_remaining(&mut self) -> Result<Vec<CoreCommand>> {
        let mut skipped = Vec::new();
        for state in self.record.task_states.values_mut() {
            if matches!(state.status, TaskStatus::Pending | TaskStatus::Ready) {
                debug!(task = %state.task_id, status = %state.status, "task never ran; marking Skipped");
                state.transition(TaskStatus::Skipped)?;
                skipped.push(state.task_id.clone());
            }
        }
        self.retry_delays.clear();
        Ok(self.skipped_commands(skipped))
    }

    fn skipped_commands(&mut self, skipped: Vec<TaskId>) -> Vec<CoreCommand> {
        let now = Utc::now();
        let mut commands = Vec::new();
        for id in skipped {
            let fatal = self.graph.spec(&id).map(|s| s.fatal).unwrap_or(false);
            if let Some(state) = self.record.task_states.get_mut(&id) {
                state.ended_at = Some(now);
                commands.push(CoreCommand::Checkpoint(state.clone()));
                commands.push(CoreCommand::TaskTerminal {
                    state: state.clone(),
                    fatal,
                });
            }
        }
        commands
    }

    fn finish(&mut self, to: WorkflowState) -> Result<Vec<CoreCommand>> {
        self.record.transition(to)?;
        info!(
            run_id = %self.record.run_id,
            state = %to,
            succeeded = self.record.count(TaskStatus::Succeeded),
            failed = self.record.count(TaskStatus::Failed),
            skipped = self.record.count(TaskStatus::Skipped),
            "run finished"
        );
        Ok(vec![self.save_run(), CoreCommand::Finish(to)])
    }

    fn save_run(&self) -> CoreCommand {
        CoreCommand::SaveRun(RunHeader::from(&self.record))
    }
}

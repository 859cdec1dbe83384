// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::checkpoint::{CheckpointStore, RunHeader};
use crate::dag::{DagGraph, RunId, RunRecord, TaskId, TaskState, TaskStatus, WorkflowState};
use crate::errors::{NightdagError, Result};
use crate::exec::{TaskExecutor, WorkerPool};
use crate::metrics::{self, MetricsSink, NoopMetricsSink};
use crate::retry::{FixedDelay, RetryPolicy};

use super::core::CoreEngine;
use super::{CoreCommand, EngineHandle, EngineOptions, RunReport, RuntimeEvent, WorkflowDefinition};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything `initialize()` produces and `start()` consumes.
struct Prepared {
    core: CoreEngine,
    executors: HashMap<TaskId, Arc<dyn TaskExecutor>>,
}

/// Drives a [`CoreEngine`] in response to [`RuntimeEvent`]s, and carries out
/// its commands: checkpoint writes, worker dispatch, metrics.
///
/// This is an IO shell around `CoreEngine`, which contains all the run
/// semantics.
///
/// Lifecycle: `initialize()` (or `initialize_resume()`) then `start()`.
/// `run()` and `resume()` do both. `shutdown()` is valid in any state; while
/// `start()` is running, use an [`EngineHandle`] instead.
pub struct WorkflowEngine {
    options: EngineOptions,
    store: Box<dyn CheckpointStore>,
    retry: Arc<dyn RetryPolicy>,
    metrics: Arc<dyn MetricsSink>,
    events_tx: mpsc::Sender<RuntimeEvent>,
    events_rx: mpsc::Receiver<RuntimeEvent>,
    prepared: Option<Prepared>,
    /// Workflow state while no core exists (before init, or after a
    /// shutdown from `Created`).
    state: WorkflowState,
    last_record: Option<RunRecord>,
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("options", &self.options)
            .field("state", &self.state())
            .field("run_id", &self.run_id())
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    pub fn new(store: impl CheckpointStore + 'static, options: EngineOptions) -> Self {
        Self::with_boxed_store(Box::new(store), options)
    }

    pub fn with_boxed_store(store: Box<dyn CheckpointStore>, options: EngineOptions) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            options,
            store,
            retry: Arc::new(FixedDelay::default()),
            metrics: Arc::new(NoopMetricsSink),
            events_tx,
            events_rx,
            prepared: None,
            state: WorkflowState::Created,
            last_record: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: Arc<dyn RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Control handle; valid before and during `start()`.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle::new(self.events_tx.clone())
    }

    pub fn state(&self) -> WorkflowState {
        match &self.prepared {
            Some(p) => p.core.workflow_state(),
            None => self
                .last_record
                .as_ref()
                .map(|r| r.workflow_state)
                .unwrap_or(self.state),
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match &self.prepared {
            Some(p) => Some(p.core.record().run_id.as_str()),
            None => self.last_record.as_ref().map(|r| r.run_id.as_str()),
        }
    }

    /// Current (or, after `start()` returned, final) run record.
    pub fn record(&self) -> Option<&RunRecord> {
        match &self.prepared {
            Some(p) => Some(p.core.record()),
            None => self.last_record.as_ref(),
        }
    }

    /// `Created -> Initialized -> Ready` for a fresh run.
    ///
    /// Validates the definition (duplicates, unknown dependencies, cycles,
    /// missing executors) and persists the new run before returning.
    pub fn initialize(&mut self, definition: WorkflowDefinition) -> Result<()> {
        self.ensure_created()?;
        let (graph, executors) = build_graph(definition)?;

        let run_id = new_run_id();
        let record = RunRecord::new(run_id.clone(), graph.tasks());
        info!(run_id = %run_id, tasks = graph.len(), "initializing new run");

        self.prepare(graph, record, executors)
    }

    /// Same as [`initialize`](Self::initialize) but reloads `run_id` from the
    /// checkpoint store. Succeeded tasks are kept; everything else starts
    /// over from `Pending`.
    pub fn initialize_resume(&mut self, definition: WorkflowDefinition, run_id: &str) -> Result<()> {
        self.ensure_created()?;
        let (graph, executors) = build_graph(definition)?;

        let mut record = self
            .store
            .load(run_id)?
            .ok_or_else(|| NightdagError::RunNotFound(run_id.to_string()))?;

        let reset = record.prepare_resume();
        reconcile_tasks(&graph, &mut record);
        info!(
            run_id = %run_id,
            reset = reset.len(),
            succeeded = record.count(TaskStatus::Succeeded),
            "resuming run"
        );
        debug!(run_id = %run_id, reset = ?reset, "tasks reset to Pending");

        self.prepare(graph, record, executors)
    }

    /// Run the workflow until it reaches a terminal state.
    ///
    /// Returns the report for `Completed`, `Failed` and `Shutdown` alike;
    /// `Err` means the run could not be carried out (persistence failure,
    /// wrong lifecycle state).
    pub async fn start(&mut self) -> Result<RunReport> {
        let Some(Prepared { mut core, executors }) = self.prepared.take() else {
            return Err(NightdagError::InvalidTransition {
                from: self.state(),
                to: WorkflowState::Running,
            });
        };

        let mut pool = WorkerPool::new(executors, self.events_tx.clone());
        let outcome = match self.drive(&mut core, &mut pool).await {
            Ok(final_state) => self.store.archive(core.record()).map(|()| final_state),
            Err(err) => Err(err),
        };

        let record = core.record().clone();
        let report = RunReport::from_record(&record, Some(core.graph()));
        self.last_record = Some(record);

        match outcome {
            Ok(final_state) => {
                metrics::report_run(self.metrics.as_ref(), &report);
                self.store.close()?;
                info!(
                    run_id = %report.run_id,
                    state = %final_state,
                    "run ended"
                );
                Ok(report)
            }
            Err(err) => {
                error!(run_id = %report.run_id, error = %err, "run aborted");
                pool.cancel_all();
                pool.abort_all();
                if let Err(close_err) = self.store.close() {
                    warn!(error = %close_err, "closing checkpoint store failed");
                }
                Err(err)
            }
        }
    }

    /// `initialize()` followed by `start()`.
    pub async fn run(&mut self, definition: WorkflowDefinition) -> Result<RunReport> {
        self.initialize(definition)?;
        self.start().await
    }

    /// `initialize_resume()` followed by `start()`.
    pub async fn resume(&mut self, definition: WorkflowDefinition, run_id: &str) -> Result<RunReport> {
        self.initialize_resume(definition, run_id)?;
        self.start().await
    }

    /// Move to `Shutdown` outside of `start()` and release the store.
    ///
    /// A no-op once the workflow is already terminal.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(Prepared { core, .. }) = self.prepared.take() {
            let mut record = core.record().clone();
            record.transition(WorkflowState::Shutdown)?;
            self.store.save_run(&RunHeader::from(&record))?;
            info!(run_id = %record.run_id, "run shut down before start");
            self.last_record = Some(record);
        } else if !self.state().is_terminal() {
            self.state = WorkflowState::Shutdown;
        }
        self.store.close()
    }

    fn ensure_created(&self) -> Result<()> {
        let from = self.state();
        if from != WorkflowState::Created || self.prepared.is_some() {
            return Err(NightdagError::InvalidTransition {
                from,
                to: WorkflowState::Initialized,
            });
        }
        Ok(())
    }

    fn prepare(
        &mut self,
        graph: DagGraph,
        mut record: RunRecord,
        executors: HashMap<TaskId, Arc<dyn TaskExecutor>>,
    ) -> Result<()> {
        record.transition(WorkflowState::Initialized)?;
        self.store.save_run(&RunHeader::from(&record))?;
        for state in record.task_states.values() {
            self.store.save(&record.run_id, state)?;
        }

        record.transition(WorkflowState::Ready)?;
        self.store.save_run(&RunHeader::from(&record))?;

        let core = CoreEngine::new(
            graph,
            record,
            Arc::clone(&self.retry),
            self.options.max_parallel,
        );
        self.prepared = Some(Prepared { core, executors });
        Ok(())
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from the channel.
    /// - Feeds them into the core engine.
    /// - Executes the commands returned by the core, in order.
    /// - Enforces the shutdown grace period once cancellation was requested.
    async fn drive(&mut self, core: &mut CoreEngine, pool: &mut WorkerPool) -> Result<WorkflowState> {
        let step = core.start()?;
        let mut grace_deadline: Option<Instant> = None;
        let mut finished = self.execute(core, pool, step.commands, &mut grace_deadline)?;

        while finished.is_none() {
            let event = match grace_deadline {
                Some(deadline) => {
                    tokio::select! {
                        ev = self.events_rx.recv() => ev,
                        _ = tokio::time::sleep_until(deadline) => {
                            let abandoned = pool.abort_all();
                            // Results that arrived before the abort still count.
                            finished = self.apply_queued_results(core, pool, &mut grace_deadline)?;
                            if finished.is_none() {
                                let step = core.abandon(&abandoned)?;
                                finished = self.execute(core, pool, step.commands, &mut grace_deadline)?;
                            }
                            continue;
                        }
                    }
                }
                None => self.events_rx.recv().await,
            };

            // The engine holds a sender, so the channel never closes under us.
            let Some(event) = event else {
                break;
            };

            if let RuntimeEvent::AttemptFinished(report) = &event {
                pool.reap(&report.task_id);
            }
            debug!(?event, "engine received event");

            let step = core.step(event)?;
            finished = self.execute(core, pool, step.commands, &mut grace_deadline)?;
        }

        Ok(finished.unwrap_or_else(|| core.workflow_state()))
    }

    /// Feed every event already in the channel to the core without waiting.
    fn apply_queued_results(
        &mut self,
        core: &mut CoreEngine,
        pool: &mut WorkerPool,
        grace_deadline: &mut Option<Instant>,
    ) -> Result<Option<WorkflowState>> {
        while let Ok(event) = self.events_rx.try_recv() {
            if let RuntimeEvent::AttemptFinished(report) = &event {
                pool.reap(&report.task_id);
            }
            debug!(?event, "engine received queued event after grace period");
            let step = core.step(event)?;
            if let Some(state) = self.execute(core, pool, step.commands, grace_deadline)? {
                return Ok(Some(state));
            }
        }
        Ok(None)
    }

    /// Execute commands from the core.
    ///
    /// Returns the terminal state if one of them was `Finish`.
    fn execute(
        &mut self,
        core: &CoreEngine,
        pool: &mut WorkerPool,
        commands: Vec<CoreCommand>,
        grace_deadline: &mut Option<Instant>,
    ) -> Result<Option<WorkflowState>> {
        let run_id: RunId = core.record().run_id.clone();
        let mut finished = None;

        for command in commands {
            match command {
                CoreCommand::Checkpoint(state) => self.checkpoint(&run_id, &state)?,
                CoreCommand::SaveRun(header) => self.store.save_run(&header)?,
                CoreCommand::Dispatch(attempt) => pool.dispatch(attempt)?,
                CoreCommand::TaskTerminal { state, fatal } => {
                    metrics::report_task(self.metrics.as_ref(), &run_id, fatal, &state);
                }
                CoreCommand::CancelInFlight => {
                    pool.cancel_all();
                    *grace_deadline = Some(Instant::now() + self.options.shutdown_grace);
                    info!(
                        grace_ms = self.options.shutdown_grace.as_millis() as u64,
                        "waiting for in-flight attempts to stop"
                    );
                }
                CoreCommand::Finish(state) => finished = Some(state),
            }
        }

        Ok(finished)
    }

    fn checkpoint(&mut self, run_id: &str, state: &TaskState) -> Result<()> {
        self.store.save(run_id, state).inspect_err(|e| {
            error!(run_id = %run_id, task = %state.task_id, error = %e, "checkpoint write failed");
        })
    }
}

fn build_graph(
    definition: WorkflowDefinition,
) -> Result<(DagGraph, HashMap<TaskId, Arc<dyn TaskExecutor>>)> {
    let (specs, executors) = definition.into_parts();
    let graph = DagGraph::build(specs)?;

    for id in graph.tasks() {
        if !executors.contains_key(id) {
            return Err(NightdagError::MissingExecutor(id.to_string()));
        }
    }

    Ok((graph, executors))
}

/// Align a reloaded record with the current graph.
fn reconcile_tasks(graph: &DagGraph, record: &mut RunRecord) {
    record.task_states.retain(|id, _| {
        let known = graph.spec(id).is_some();
        if !known {
            warn!(task = %id, "task no longer in workflow; dropping its checkpoint state");
        }
        known
    });
    for id in graph.tasks() {
        if !record.task_states.contains_key(id) {
            info!(task = %id, "task added since the run started; starting Pending");
            record
                .task_states
                .insert(id.to_string(), TaskState::pending(id));
        }
    }
}

/// Run ids are UUIDv7, so lexical order is creation order.
fn new_run_id() -> RunId {
    Uuid::now_v7().to_string()
}

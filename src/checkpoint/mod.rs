// src/checkpoint/mod.rs

//! Durable record of run progress.
//!
//! Progress is stored as an append-only log of [`CheckpointEntry`] values
//! keyed by run id. Reconstructing a [`RunRecord`] is a fold over that log,
//! later entries replacing earlier ones for the same task, so a run survives
//! a process restart at any point between two writes.
//!
//! - [`file`] keeps one JSON-lines log per run and compacts it into an
//!   atomically renamed snapshot once the run is terminal.
//! - [`memory`] keeps everything in process; clones share state, which is what
//!   tests use to "restart" an engine against the same store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::{RunId, RunRecord, TaskState, WorkflowState};
use crate::errors::{NightdagError, Result};

pub mod file;
pub mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;

/// Workflow-level part of a [`RunRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHeader {
    pub run_id: RunId,
    pub workflow_state: WorkflowState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<&RunRecord> for RunHeader {
    fn from(record: &RunRecord) -> Self {
        Self {
            run_id: record.run_id.clone(),
            workflow_state: record.workflow_state,
            started_at: record.started_at,
            ended_at: record.ended_at,
        }
    }
}

/// One line of the checkpoint log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum CheckpointEntry {
    Run(RunHeader),
    Task(TaskState),
}

/// Abstract storage for run progress.
///
/// Every `save*` call must be durable when it returns: the engine treats a
/// returned `Ok` as "this transition survives a crash".
pub trait CheckpointStore: Send {
    /// Persist one task's state for `run_id`.
    fn save(&mut self, run_id: &str, state: &TaskState) -> Result<()>;

    /// Persist the workflow-level state of a run.
    fn save_run(&mut self, header: &RunHeader) -> Result<()>;

    /// Reconstruct a run, or `None` if nothing was ever saved for it.
    fn load(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Most recently created run, if any.
    fn latest_run_id(&self) -> Result<Option<RunId>>;

    /// Called once the run is terminal; stores may compact here.
    fn archive(&mut self, record: &RunRecord) -> Result<()>;

    /// Release handles. Further writes are an error.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fold log entries on top of an optional base snapshot.
pub fn fold_entries<I>(run_id: &str, base: Option<RunRecord>, entries: I) -> Result<Option<RunRecord>>
where
    I: IntoIterator<Item = CheckpointEntry>,
{
    let mut record = base;

    for entry in entries {
        match entry {
            CheckpointEntry::Run(header) => {
                let rec = record.get_or_insert_with(|| RunRecord {
                    run_id: header.run_id.clone(),
                    workflow_state: header.workflow_state,
                    started_at: header.started_at,
                    ended_at: header.ended_at,
                    task_states: Default::default(),
                });
                rec.workflow_state = header.workflow_state;
                rec.started_at = header.started_at;
                rec.ended_at = header.ended_at;
            }
            CheckpointEntry::Task(state) => match record.as_mut() {
                Some(rec) => {
                    rec.task_states.insert(state.task_id.clone(), state);
                }
                None => {
                    return Err(NightdagError::Persistence(format!(
                        "run '{}': task entry for '{}' precedes the run header",
                        run_id, state.task_id
                    )));
                }
            },
        }
    }

    Ok(record)
}

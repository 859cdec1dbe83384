// src/checkpoint/memory.rs

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::checkpoint::{fold_entries, CheckpointEntry, CheckpointStore, RunHeader};
use crate::dag::{RunId, RunRecord, TaskState};
use crate::errors::{NightdagError, Result};

/// Keeps checkpoint logs in memory.
///
/// Clones share the same underlying logs, so a test can hand one clone to an
/// engine, drop the engine mid-run, and resume from another clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    logs: Arc<Mutex<BTreeMap<RunId, Vec<CheckpointEntry>>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry written for `run_id`, in write order.
    pub fn entries(&self, run_id: &str) -> Vec<CheckpointEntry> {
        self.lock()
            .map(|logs| logs.get(run_id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<RunId, Vec<CheckpointEntry>>>> {
        self.logs
            .lock()
            .map_err(|_| NightdagError::Persistence("memory checkpoint lock poisoned".to_string()))
    }

    fn append(&self, run_id: &str, entry: CheckpointEntry) -> Result<()> {
        let mut logs = self.lock()?;
        logs.entry(run_id.to_string()).or_default().push(entry);
        Ok(())
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&mut self, run_id: &str, state: &TaskState) -> Result<()> {
        self.append(run_id, CheckpointEntry::Task(state.clone()))
    }

    fn save_run(&mut self, header: &RunHeader) -> Result<()> {
        self.append(&header.run_id, CheckpointEntry::Run(header.clone()))
    }

    fn load(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let entries = self.entries(run_id);
        fold_entries(run_id, None, entries)
    }

    fn latest_run_id(&self) -> Result<Option<RunId>> {
        Ok(self.lock()?.keys().next_back().cloned())
    }

    fn archive(&mut self, record: &RunRecord) -> Result<()> {
        debug!(run_id = %record.run_id, "archive requested (memory store keeps full log)");
        Ok(())
    }
}

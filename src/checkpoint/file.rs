// src/checkpoint/file.rs

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::checkpoint::{fold_entries, CheckpointEntry, CheckpointStore, RunHeader};
use crate::dag::{RunId, RunRecord, TaskState};
use crate::errors::{NightdagError, Result};

/// Directory (under the state dir) holding per-run files.
///
/// For a run `<id>` the store keeps:
/// - `<state_dir>/runs/<id>.jsonl`: append log, one [`CheckpointEntry`] per line
/// - `<state_dir>/runs/<id>.json`: compacted snapshot, written on archive
pub const RUNS_DIR: &str = "runs";

const LOG_EXT: &str = "jsonl";
const SNAPSHOT_EXT: &str = "json";

/// Stores run progress as JSON lines under a state directory.
#[derive(Debug)]
pub struct FileCheckpointStore {
    runs_dir: PathBuf,
    closed: bool,
}

impl FileCheckpointStore {
    /// Open (creating if needed) the store rooted at `state_dir`.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self> {
        let runs_dir = state_dir.as_ref().join(RUNS_DIR);
        fs::create_dir_all(&runs_dir)
            .map_err(|e| persistence("creating checkpoint directory", &runs_dir, e))?;
        debug!(dir = ?runs_dir, "opened file checkpoint store");
        Ok(Self {
            runs_dir,
            closed: false,
        })
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    fn log_path(&self, run_id: &str) -> Result<PathBuf> {
        check_run_id(run_id)?;
        Ok(self.runs_dir.join(format!("{run_id}.{LOG_EXT}")))
    }

    fn snapshot_path(&self, run_id: &str) -> Result<PathBuf> {
        check_run_id(run_id)?;
        Ok(self.runs_dir.join(format!("{run_id}.{SNAPSHOT_EXT}")))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(NightdagError::Persistence(
                "checkpoint store is closed".to_string(),
            ));
        }
        Ok(())
    }

    /// Append one entry and fsync before returning.
    ///
    /// A torn tail left by a crash is cut back to the last complete line
    /// first, so the new entry always starts on its own line.
    fn append(&self, run_id: &str, entry: &CheckpointEntry) -> Result<()> {
        self.ensure_open()?;
        let path = self.log_path(run_id)?;

        let mut line = serde_json::to_string(entry)
            .map_err(|e| NightdagError::Persistence(format!("encoding checkpoint entry: {e}")))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| persistence("opening checkpoint log", &path, e))?;
        let end = truncate_torn_tail(&mut file, run_id)
            .map_err(|e| persistence("repairing checkpoint log", &path, e))?;
        file.seek(SeekFrom::Start(end))
            .map_err(|e| persistence("seeking checkpoint log", &path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| persistence("appending to checkpoint log", &path, e))?;
        file.sync_data()
            .map_err(|e| persistence("syncing checkpoint log", &path, e))?;

        Ok(())
    }

    /// Read every entry of a run's log.
    ///
    /// A final line that does not parse is treated as a torn write from a
    /// crash and dropped; an unparsable line anywhere else is corruption.
    fn read_log(&self, run_id: &str) -> Result<Vec<CheckpointEntry>> {
        let path = self.log_path(run_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path).map_err(|e| persistence("opening checkpoint log", &path, e))?;
        let lines: Vec<String> = BufReader::new(file)
            .lines()
            .collect::<io::Result<_>>()
            .map_err(|e| persistence("reading checkpoint log", &path, e))?;

        let last_non_empty = lines.iter().rposition(|l| !l.trim().is_empty());
        let mut entries = Vec::with_capacity(lines.len());

        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<CheckpointEntry>(trimmed) {
                Ok(entry) => entries.push(entry),
                Err(e) if Some(idx) == last_non_empty => {
                    warn!(
                        run_id = %run_id,
                        line = idx + 1,
                        error = %e,
                        "ignoring torn final checkpoint line"
                    );
                }
                Err(e) => {
                    return Err(NightdagError::Persistence(format!(
                        "corrupt checkpoint log {:?} at line {}: {}",
                        path,
                        idx + 1,
                        e
                    )));
                }
            }
        }

        Ok(entries)
    }

    fn read_snapshot(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let path = self.snapshot_path(run_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path).map_err(|e| persistence("reading run snapshot", &path, e))?;
        let record = serde_json::from_slice::<RunRecord>(&raw).map_err(|e| {
            NightdagError::Persistence(format!("corrupt run snapshot {:?}: {}", path, e))
        })?;
        Ok(Some(record))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&mut self, run_id: &str, state: &TaskState) -> Result<()> {
        self.append(run_id, &CheckpointEntry::Task(state.clone()))
    }

    fn save_run(&mut self, header: &RunHeader) -> Result<()> {
        self.append(&header.run_id, &CheckpointEntry::Run(header.clone()))
    }

    fn load(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let base = self.read_snapshot(run_id)?;
        let entries = self.read_log(run_id)?;
        fold_entries(run_id, base, entries)
    }

    fn latest_run_id(&self) -> Result<Option<RunId>> {
        let dir = fs::read_dir(&self.runs_dir)
            .map_err(|e| persistence("listing checkpoint directory", &self.runs_dir, e))?;

        let mut latest: Option<RunId> = None;
        for entry in dir {
            let entry =
                entry.map_err(|e| persistence("listing checkpoint directory", &self.runs_dir, e))?;
            let path = entry.path();
            let is_run_file = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == LOG_EXT || e == SNAPSHOT_EXT)
                .unwrap_or(false);
            if !is_run_file {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if latest.as_deref().map(|l| stem > l).unwrap_or(true) {
                    latest = Some(stem.to_string());
                }
            }
        }

        Ok(latest)
    }

    fn archive(&mut self, record: &RunRecord) -> Result<()> {
        self.ensure_open()?;
        let snapshot = self.snapshot_path(&record.run_id)?;
        let tmp = snapshot.with_extension("json.tmp");

        let raw = serde_json::to_vec_pretty(record)
            .map_err(|e| NightdagError::Persistence(format!("encoding run snapshot: {e}")))?;
        {
            let mut file =
                File::create(&tmp).map_err(|e| persistence("creating run snapshot", &tmp, e))?;
            file.write_all(&raw)
                .map_err(|e| persistence("writing run snapshot", &tmp, e))?;
            file.sync_all()
                .map_err(|e| persistence("syncing run snapshot", &tmp, e))?;
        }
        fs::rename(&tmp, &snapshot)
            .map_err(|e| persistence("renaming run snapshot", &snapshot, e))?;

        // The snapshot already contains everything in the log; a crash before
        // this removal only means the same entries get folded twice.
        let log = self.log_path(&record.run_id)?;
        if log.exists() {
            fs::remove_file(&log).map_err(|e| persistence("removing checkpoint log", &log, e))?;
        }

        info!(
            run_id = %record.run_id,
            state = %record.workflow_state,
            path = ?snapshot,
            "archived run"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Cut a log back to the end of its last complete line.
///
/// Returns the resulting length, where the next entry goes.
fn truncate_torn_tail(file: &mut File, run_id: &str) -> io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut raw = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut raw)?;
    let keep = raw
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos as u64 + 1)
        .unwrap_or(0);

    warn!(
        run_id = %run_id,
        dropped_bytes = len - keep,
        "truncating torn final checkpoint line"
    );
    file.set_len(keep)?;
    file.sync_data()?;
    Ok(keep)
}

fn persistence(action: &str, path: &Path, err: std::io::Error) -> NightdagError {
    NightdagError::Persistence(format!("{action} {path:?}: {err}"))
}

fn check_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(NightdagError::Persistence(format!(
            "invalid run id '{run_id}' (expected [A-Za-z0-9_-]+)"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{TaskStatus, WorkflowState};

    fn record() -> RunRecord {
        let mut r = RunRecord::new("run-1", ["A", "B"]);
        r.workflow_state = WorkflowState::Running;
        r
    }

    fn succeeded(id: &str) -> TaskState {
        let mut s = TaskState::pending(id);
        s.status = TaskStatus::Succeeded;
        s.attempt = 1;
        s
    }

    #[test]
    fn log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record();
        {
            let mut store = FileCheckpointStore::open(dir.path()).unwrap();
            store.save_run(&RunHeader::from(&rec)).unwrap();
            for s in rec.task_states.values() {
                store.save(&rec.run_id, s).unwrap();
            }
            store.save(&rec.run_id, &succeeded("A")).unwrap();
        }

        let store = FileCheckpointStore::open(dir.path()).unwrap();
        let loaded = store.load("run-1").unwrap().unwrap();
        assert_eq!(loaded.workflow_state, WorkflowState::Running);
        assert_eq!(loaded.status_of("A"), Some(TaskStatus::Succeeded));
        assert_eq!(loaded.status_of("B"), Some(TaskStatus::Pending));
        assert_eq!(store.latest_run_id().unwrap().as_deref(), Some("run-1"));
    }

    #[test]
    fn torn_final_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record();
        let mut store = FileCheckpointStore::open(dir.path()).unwrap();
        store.save_run(&RunHeader::from(&rec)).unwrap();
        store.save(&rec.run_id, &succeeded("A")).unwrap();

        let log = store.log_path("run-1").unwrap();
        let mut f = OpenOptions::new().append(true).open(&log).unwrap();
        f.write_all(br#"{"entry":"task","task_id":"B","sta"#).unwrap();

        let loaded = store.load("run-1").unwrap().unwrap();
        assert_eq!(loaded.status_of("A"), Some(TaskStatus::Succeeded));
        assert_eq!(loaded.status_of("B"), None);
    }

    #[test]
    fn appends_after_torn_line_stay_readable() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = record();
        {
            let mut store = FileCheckpointStore::open(dir.path()).unwrap();
            store.save_run(&RunHeader::from(&rec)).unwrap();
            store.save(&rec.run_id, &succeeded("A")).unwrap();
            let log = store.log_path("run-1").unwrap();
            let mut f = OpenOptions::new().append(true).open(&log).unwrap();
            f.write_all(br#"{"entry":"task","task_id":"B","sta"#).unwrap();
        }

        // Reopened as a resumed run would: load, then keep writing.
        let mut store = FileCheckpointStore::open(dir.path()).unwrap();
        assert!(store.load("run-1").unwrap().is_some());
        rec.workflow_state = WorkflowState::Ready;
        store.save_run(&RunHeader::from(&rec)).unwrap();
        let mut running = TaskState::pending("B");
        running.status = TaskStatus::Running;
        running.attempt = 1;
        store.save(&rec.run_id, &running).unwrap();

        let loaded = store.load("run-1").unwrap().unwrap();
        assert_eq!(loaded.workflow_state, WorkflowState::Ready);
        assert_eq!(loaded.status_of("A"), Some(TaskStatus::Succeeded));
        assert_eq!(loaded.status_of("B"), Some(TaskStatus::Running));

        let raw = fs::read_to_string(store.log_path("run-1").unwrap()).unwrap();
        assert_eq!(raw.lines().count(), 4);
        for line in raw.lines() {
            serde_json::from_str::<CheckpointEntry>(line).unwrap();
        }
    }

    #[test]
    fn corrupt_interior_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        let log = store.log_path("run-1").unwrap();
        let header = serde_json::to_string(&CheckpointEntry::Run(RunHeader::from(&record()))).unwrap();
        fs::write(&log, format!("not json\n{header}\n")).unwrap();

        let err = store.load("run-1").unwrap_err();
        assert!(err.is_persistence(), "{err:?}");
    }

    #[test]
    fn archive_compacts_and_later_entries_still_apply() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = record();
        let mut store = FileCheckpointStore::open(dir.path()).unwrap();
        store.save_run(&RunHeader::from(&rec)).unwrap();

        rec.task_states.insert("A".to_string(), succeeded("A"));
        rec.workflow_state = WorkflowState::Failed;
        store.archive(&rec).unwrap();
        assert!(!store.log_path("run-1").unwrap().exists());
        assert!(store.snapshot_path("run-1").unwrap().exists());

        store.save(&rec.run_id, &succeeded("B")).unwrap();
        let loaded = store.load("run-1").unwrap().unwrap();
        assert_eq!(loaded.workflow_state, WorkflowState::Failed);
        assert_eq!(loaded.status_of("B"), Some(TaskStatus::Succeeded));
    }

    #[test]
    fn rejects_path_like_run_ids_and_writes_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCheckpointStore::open(dir.path()).unwrap();
        assert!(store.load("../etc").is_err());
        store.close().unwrap();
        assert!(store.save("run-1", &succeeded("A")).unwrap_err().is_persistence());
    }

    #[test]
    fn unknown_run_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        assert!(store.load("nope").unwrap().is_none());
        assert!(store.latest_run_id().unwrap().is_none());
    }
}

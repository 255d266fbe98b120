//! Append-only run store with file-based persistence.
//!
//! Each run owns a directory holding `snapshots.jsonl`: one full RunState
//! per committed transition, newline-delimited JSON for easy inspection.
//! The last line is the authoritative state; the history makes the
//! append-only audit property externally checkable. An advisory lock file
//! guarantees a run is driven by at most one orchestrator at a time.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::RunState;

/// File-based snapshot store for one run, holding the run lock.
pub struct RunStore {
    run_dir: PathBuf,
    snapshots_path: PathBuf,
    // held for the lifetime of the store; dropping releases the run
    _lock: std::fs::File,
}

impl RunStore {
    /// Create or open the store for a run, taking exclusive ownership.
    ///
    /// Fails if another process currently drives the same run.
    pub async fn open(root: &Path, run_id: &str) -> Result<Self> {
        let run_dir = root.join(run_id);
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("failed to create run directory: {}", run_dir.display()))?;

        let lock_path = run_dir.join("run.lock");
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open lock file: {}", lock_path.display()))?;
        lock.try_lock_exclusive()
            .with_context(|| format!("run {} is already owned by another process", run_id))?;

        Ok(Self {
            snapshots_path: run_dir.join("snapshots.jsonl"),
            run_dir,
            _lock: lock,
        })
    }

    /// Get the run directory.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append one state snapshot to the log.
    pub async fn append_snapshot(&self, state: &RunState) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.snapshots_path)
            .await
            .with_context(|| {
                format!(
                    "failed to open snapshot log: {}",
                    self.snapshots_path.display()
                )
            })?;

        let json = serde_json::to_string(state).context("failed to serialize run state")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("failed to write snapshot")?;
        file.flush().await.context("failed to flush snapshot")?;

        Ok(())
    }

    /// Load the latest snapshot, if any.
    pub async fn load_latest(&self) -> Result<Option<RunState>> {
        Ok(Self::read_history(&self.snapshots_path).await?.pop())
    }

    /// Load the whole snapshot history in append order.
    pub async fn history(&self) -> Result<Vec<RunState>> {
        Self::read_history(&self.snapshots_path).await
    }

    /// Read the latest snapshot of a run without taking ownership.
    /// Safe to call while another process drives the run.
    pub async fn read_latest(root: &Path, run_id: &str) -> Result<Option<RunState>> {
        let path = root.join(run_id).join("snapshots.jsonl");
        Ok(Self::read_history(&path).await?.pop())
    }

    async fn read_history(path: &Path) -> Result<Vec<RunState>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)
            .await
            .with_context(|| format!("failed to open snapshot log: {}", path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut states = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let state: RunState = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse snapshot: {}", line))?;
            states.push(state);
        }

        Ok(states)
    }

    /// List all run ids under the store root.
    pub async fn list_runs(root: &Path) -> Result<Vec<String>> {
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        let mut entries = fs::read_dir(root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    runs.push(name.to_string());
                }
            }
        }

        runs.sort();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Flags, RunStatus, Stage, StageUpdate, Task};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn test_run() -> RunState {
        RunState::new(Task::ResumePipeline, BTreeMap::new(), Flags::default())
    }

    #[tokio::test]
    async fn test_append_and_load_latest() {
        let temp = TempDir::new().unwrap();
        let mut run = test_run();
        let store = RunStore::open(temp.path(), &run.id).await.unwrap();

        store.append_snapshot(&run).await.unwrap();
        run.apply(
            StageUpdate::advance_to(Stage::Ingestion)
                .with_status(RunStatus::InProgress)
                .with_audit("route.dispatched:ingestion"),
        );
        store.append_snapshot(&run).await.unwrap();

        let latest = store.load_latest().await.unwrap().unwrap();
        assert_eq!(latest, run);
        assert_eq!(latest.stage, Stage::Ingestion);

        let history = store.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stage, Stage::Route);
    }

    #[tokio::test]
    async fn test_history_is_prefix_extension() {
        let temp = TempDir::new().unwrap();
        let mut run = test_run();
        let store = RunStore::open(temp.path(), &run.id).await.unwrap();

        run.stage = Stage::Ingestion;
        for i in 0..4 {
            run.audit_trail.push(format!("entry{}", i));
            store.append_snapshot(&run).await.unwrap();
        }

        let history = store.history().await.unwrap();
        for pair in history.windows(2) {
            let earlier = &pair[0].audit_trail;
            let later = &pair[1].audit_trail;
            assert!(later.starts_with(earlier.as_slice()));
        }
    }

    #[tokio::test]
    async fn test_exclusive_run_ownership() {
        let temp = TempDir::new().unwrap();
        let run = test_run();

        let first = RunStore::open(temp.path(), &run.id).await.unwrap();
        assert!(RunStore::open(temp.path(), &run.id).await.is_err());

        drop(first);
        assert!(RunStore::open(temp.path(), &run.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_latest_without_ownership() {
        let temp = TempDir::new().unwrap();
        let run = test_run();
        let store = RunStore::open(temp.path(), &run.id).await.unwrap();
        store.append_snapshot(&run).await.unwrap();

        // lock still held by `store`
        let latest = RunStore::read_latest(temp.path(), &run.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, run.id);
    }

    #[tokio::test]
    async fn test_list_runs() {
        let temp = TempDir::new().unwrap();
        let run_a = test_run();
        let run_b = test_run();
        let _store_a = RunStore::open(temp.path(), &run_a.id).await.unwrap();
        let _store_b = RunStore::open(temp.path(), &run_b.id).await.unwrap();

        let mut expected = vec![run_a.id.clone(), run_b.id.clone()];
        expected.sort();
        assert_eq!(RunStore::list_runs(temp.path()).await.unwrap(), expected);
    }
}

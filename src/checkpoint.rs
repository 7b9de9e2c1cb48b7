use crate::{CheckpointError, Criticality, ExecutionContext, TaskRecord, TaskResult, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A task that reached a terminal state before the checkpoint was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTask {
    pub id: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub result: Option<TaskResult>,
}

impl From<&TaskRecord> for CompletedTask {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.id.clone(),
            status: record.status,
            attempts: record.attempt_count,
            duration_ms: record.duration_ms,
            error: record.last_error.clone(),
            result: record.result.clone(),
        }
    }
}

impl CompletedTask {
    pub fn to_record(&self, criticality: Criticality) -> TaskRecord {
        TaskRecord {
            id: self.id.clone(),
            criticality,
            status: self.status,
            attempt_count: self.attempts,
            last_error: self.error.clone(),
            started_at: None,
            finished_at: None,
            duration_ms: self.duration_ms,
            result: self.result.clone(),
        }
    }
}

/// Snapshot of a run at a fully resolved level boundary. Never modified once
/// written; the next checkpoint supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub run_id: String,
    pub sequence: u64,
    /// Index of the last level resolved when the checkpoint was taken.
    pub level: usize,
    pub timestamp: DateTime<Utc>,
    pub completed_tasks: Vec<CompletedTask>,
    pub context: ExecutionContext,
}

impl Checkpoint {
    pub fn completed(&self, id: &str) -> Option<&CompletedTask> {
        self.completed_tasks.iter().find(|t| t.id == id)
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;
}

/// Keeps every checkpoint in memory, grouped by run.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, run_id: &str) -> Vec<Checkpoint> {
        self.runs.lock().get(run_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.runs
            .lock()
            .entry(checkpoint.run_id.clone())
            .or_default()
            .push(checkpoint.clone());
        Ok(())
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .runs
            .lock()
            .get(run_id)
            .and_then(|history| history.iter().max_by_key(|c| c.sequence).cloned()))
    }
}

/// Stores checkpoints as JSON under `<root>/<run_id>/checkpoint-<sequence>.json`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn file_name(sequence: u64) -> String {
        format!("checkpoint-{sequence:06}.json")
    }

    fn parse_sequence(path: &Path) -> Option<u64> {
        path.file_name()?
            .to_str()?
            .strip_prefix("checkpoint-")?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let dir = self.run_dir(&checkpoint.run_id);
        tokio::fs::create_dir_all(&dir).await?;

        let name = Self::file_name(checkpoint.sequence);
        let target = dir.join(&name);
        let staging = dir.join(format!(".{name}.tmp"));

        let json = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&staging, json).await?;
        tokio::fs::rename(&staging, &target).await?;

        debug!(run_id = %checkpoint.run_id, path = %target.display(), "checkpoint written");
        Ok(())
    }

    async fn load_latest(&self, run_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let mut entries = match tokio::fs::read_dir(self.run_dir(run_id)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut latest: Option<(u64, PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(sequence) = Self::parse_sequence(&path) {
                if latest.as_ref().is_none_or(|(best, _)| sequence > *best) {
                    latest = Some((sequence, path));
                }
            }
        }

        let Some((_, path)) = latest else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}

//! Execution-state and sync-checkpoint persistence (spec §3, §6).
//!
//! Both stores are best-effort: a write failure is logged and swallowed —
//! mirroring the teacher's checkpointer, which never lets a save failure
//! abort the run it's trying to make resumable.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::channels::errors::ErrorEvent;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("persistence io error: {0}")]
    Io(String),
    #[error("persistence serialization error: {0}")]
    Serde(String),
}

// ---- Sync checkpoints (spec §3 "Sync Checkpoint", §6) ----------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SyncCheckpoint {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[async_trait]
pub trait SyncCheckpointStore: Send + Sync {
    async fn get(&self, source: &str, action: &str) -> Option<SyncCheckpoint>;
    async fn commit(&self, source: &str, action: &str, checkpoint: SyncCheckpoint);
}

fn checkpoint_key(source: &str, action: &str) -> String {
    format!("{source}:{action}")
}

pub struct FileSyncCheckpointStore {
    path: PathBuf,
    state: parking_lot::Mutex<FxHashMap<String, SyncCheckpoint>>,
}

impl FileSyncCheckpointStore {
    pub async fn create(data_dir: &Path, mission: &str) -> Result<Self, PersistenceError> {
        let dir = data_dir.join("sync");
        tokio::fs::create_dir_all(&dir).await.map_err(|e| PersistenceError::Io(e.to_string()))?;
        let path = dir.join(format!("{mission}.json"));
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| PersistenceError::Serde(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FxHashMap::default(),
            Err(e) => return Err(PersistenceError::Io(e.to_string())),
        };
        Ok(Self { path, state: parking_lot::Mutex::new(state) })
    }

    async fn persist(&self) {
        let snapshot = self.state.lock().clone();
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(&self.path, bytes).await {
                    warn!(path = %self.path.display(), error = %err, "failed to persist sync checkpoints");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize sync checkpoints"),
        }
    }
}

#[async_trait]
impl SyncCheckpointStore for FileSyncCheckpointStore {
    async fn get(&self, source: &str, action: &str) -> Option<SyncCheckpoint> {
        self.state.lock().get(&checkpoint_key(source, action)).cloned()
    }

    async fn commit(&self, source: &str, action: &str, checkpoint: SyncCheckpoint) {
        self.state.lock().insert(checkpoint_key(source, action), checkpoint);
        self.persist().await;
    }
}

/// A no-op store for missions that don't declare `since` on any fetch step,
/// or that opt out of incremental-sync persistence entirely.
#[derive(Default)]
pub struct NullSyncCheckpointStore;

#[async_trait]
impl SyncCheckpointStore for NullSyncCheckpointStore {
    async fn get(&self, _source: &str, _action: &str) -> Option<SyncCheckpoint> {
        None
    }

    async fn commit(&self, _source: &str, _action: &str, _checkpoint: SyncCheckpoint) {}
}

// ---- Execution state (spec §3 "Execution State", §6) ----------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    #[serde(default)]
    pub actions_completed: Vec<String>,
    #[serde(default)]
    pub checkpoints: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionState {
    pub mission: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub current_stage: usize,
    pub stages: Vec<StageRecord>,
    #[serde(default)]
    pub errors: Vec<ErrorEvent>,
}

impl ExecutionState {
    #[must_use]
    pub fn new(mission: impl Into<String>, run_id: impl Into<String>, stage_names: &[String]) -> Self {
        Self {
            mission: mission.into(),
            run_id: run_id.into(),
            started_at: Utc::now(),
            current_stage: 0,
            stages: stage_names
                .iter()
                .map(|name| StageRecord {
                    name: name.clone(),
                    status: StageStatus::Pending,
                    actions_completed: Vec::new(),
                    checkpoints: serde_json::Value::Null,
                })
                .collect(),
            errors: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ExecutionStateStore: Send + Sync {
    async fn save(&self, state: &ExecutionState);
    async fn load_latest(&self, mission: &str) -> Option<ExecutionState>;
}

pub struct FileExecutionStateStore {
    dir: PathBuf,
}

impl FileExecutionStateStore {
    pub async fn create(data_dir: &Path) -> Result<Self, PersistenceError> {
        let dir = data_dir.join("executions");
        tokio::fs::create_dir_all(&dir).await.map_err(|e| PersistenceError::Io(e.to_string()))?;
        Ok(Self { dir })
    }
}

#[async_trait]
impl ExecutionStateStore for FileExecutionStateStore {
    async fn save(&self, state: &ExecutionState) {
        let path = self.dir.join(format!("{}-{}.json", state.mission, state.run_id));
        match serde_json::to_vec_pretty(state) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(&path, bytes).await {
                    warn!(path = %path.display(), error = %err, "failed to persist execution state");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize execution state"),
        }
    }

    async fn load_latest(&self, mission: &str) -> Option<ExecutionState> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.ok()?;
        let mut latest: Option<ExecutionState> = None;
        let prefix = format!("{mission}-");
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&prefix) {
                continue;
            }
            let Ok(raw) = tokio::fs::read_to_string(entry.path()).await else { continue };
            let Ok(state) = serde_json::from_str::<ExecutionState>(&raw) else { continue };
            if latest.as_ref().is_none_or(|l| state.started_at > l.started_at) {
                latest = Some(state);
            }
        }
        latest
    }
}

/// A no-op store for runs with persistence disabled — `resume` is then
/// never possible, which is the documented default (spec §4.6 setup step 5).
#[derive(Default)]
pub struct NullExecutionStateStore;

#[async_trait]
impl ExecutionStateStore for NullExecutionStateStore {
    async fn save(&self, _state: &ExecutionState) {}

    async fn load_latest(&self, _mission: &str) -> Option<ExecutionState> {
        None
    }
}

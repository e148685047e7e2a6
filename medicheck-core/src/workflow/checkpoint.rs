//! Checkpoint persistence for suspended sessions
//!
//! A checkpoint is written the first time a session suspends and updated
//! after every later step, so it always holds the last good state. Writes are
//! last-write-wins per session id; the scheduler serializes writers for the
//! same session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{ExecutionTrace, StepId};
use crate::error::{MedicheckError, Result};
use crate::state::WorkflowState;

/// Lifecycle of a checkpointed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for external input at `pending_step`
    Suspended,
    /// A resume consumed the suspension and steps are executing
    Running,
    Completed,
    Failed,
}

/// Persisted snapshot of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,

    pub state: WorkflowState,

    /// Step to re-enter on resume; `None` once the suspension is consumed
    pub pending_step: Option<StepId>,

    pub status: SessionStatus,

    /// Node executions counted against the step limit
    pub steps_executed: usize,

    #[serde(default)]
    pub trace: ExecutionTrace,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Whether a suspended checkpoint has outlived `ttl`
    ///
    /// Only suspended checkpoints expire; running, completed and failed ones
    /// are retained until purged explicitly.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        if self.status != SessionStatus::Suspended {
            return false;
        }
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.updated_at > ttl,
            Err(_) => false,
        }
    }
}

/// Durable storage for checkpoints keyed by session id
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert or overwrite the checkpoint for its session
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>>;

    /// Remove a checkpoint, returning whether one existed
    async fn delete(&self, session_id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<Checkpoint>>;

    /// Delete suspended checkpoints older than `ttl`, returning the count
    async fn purge_expired(&self, ttl: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut purged = 0;
        for checkpoint in self.list().await? {
            if checkpoint.is_expired(ttl, now) && self.delete(&checkpoint.session_id).await? {
                tracing::warn!(session_id = %checkpoint.session_id, "Expired checkpoint purged");
                purged += 1;
            }
        }
        Ok(purged)
    }
}

/// In-memory checkpoint store for tests and single-process use
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.session_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.read().await.get(session_id).cloned())
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.checkpoints.write().await.remove(session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.checkpoints.read().await.values().cloned().collect())
    }
}

/// File-backed checkpoint store: one JSON document per session
///
/// Documents are written to a temporary file and renamed into place so a
/// crash mid-write never leaves a truncated checkpoint behind.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{}.json", session_id)))
    }
}

/// Session ids become file names, so keep them to a safe alphabet
fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MedicheckError::Configuration(format!(
            "invalid session id '{}': use ASCII letters, digits, '-' or '_'",
            session_id
        )))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.session_id)?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(checkpoint)?;

        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(
            session_id = %checkpoint.session_id,
            path = %path.display(),
            "Checkpoint written"
        );
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(session_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let path = self.path_for(session_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Checkpoint>(&bytes) {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint");
                }
            }
        }
        checkpoints.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PatientInput;

    fn checkpoint(session_id: &str, status: SessionStatus) -> Checkpoint {
        let now = Utc::now();
        Checkpoint {
            session_id: session_id.to_string(),
            state: WorkflowState::from_input(&PatientInput::new("back pain")),
            pending_step: Some(StepId::CollectMedicalHistory),
            status,
            steps_executed: 3,
            trace: ExecutionTrace::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_memory_last_write_wins() {
        let store = MemoryCheckpointStore::new();
        let mut cp = checkpoint("s1", SessionStatus::Suspended);
        store.save(&cp).await.unwrap();

        cp.pending_step = None;
        cp.status = SessionStatus::Running;
        store.save(&cp).await.unwrap();

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Running);
        assert!(loaded.pending_step.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let store = MemoryCheckpointStore::new();
        store.save(&checkpoint("s1", SessionStatus::Suspended)).await.unwrap();

        assert!(store.delete("s1").await.unwrap());
        assert!(!store.delete("s1").await.unwrap());
        assert!(store.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileCheckpointStore::open(dir.path()).await.unwrap();
            store.save(&checkpoint("abc-123", SessionStatus::Suspended)).await.unwrap();
        }

        let reopened = FileCheckpointStore::open(dir.path()).await.unwrap();
        let loaded = reopened.load("abc-123").await.unwrap().unwrap();
        assert_eq!(loaded.pending_step, Some(StepId::CollectMedicalHistory));
        assert_eq!(loaded.state.latest_user_message(), Some("back pain"));
        assert_eq!(reopened.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::open(dir.path()).await.unwrap();
        assert!(store.load("../escape").await.is_err());
        assert!(store.load("").await.is_err());
    }

    #[tokio::test]
    async fn test_purge_expired_only_touches_suspended() {
        let store = MemoryCheckpointStore::new();
        let old = Utc::now() - chrono::Duration::hours(3);

        let mut stale = checkpoint("stale", SessionStatus::Suspended);
        stale.updated_at = old;
        let mut done = checkpoint("done", SessionStatus::Completed);
        done.updated_at = old;
        let fresh = checkpoint("fresh", SessionStatus::Suspended);

        for cp in [&stale, &done, &fresh] {
            store.save(cp).await.unwrap();
        }

        let purged = store.purge_expired(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.load("stale").await.unwrap().is_none());
        assert!(store.load("done").await.unwrap().is_some());
        assert!(store.load("fresh").await.unwrap().is_some());
    }
}

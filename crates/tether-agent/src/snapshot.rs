//! Conversation snapshots and their storage.
//!
//! A snapshot is everything a conversation needs to be rebuilt: transcript,
//! usage records and turns not yet folded in. One is written at every
//! continuation boundary and, optionally, whenever the loop pauses after an
//! answer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::inbox::PendingTurn;
use crate::usage::Usage;

/// Where a rebuilt orchestrator picks up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePoint {
    /// Wait for a turn or an exit request first
    #[default]
    AwaitTurn,
    /// Turns were folded in but not yet answered; reason over them again
    Reason,
}

/// Serializable conversation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub conversation_id: String,
    /// Number of continuations so far
    pub epoch: u32,
    pub transcript: Vec<String>,
    pub usage: Vec<Usage>,
    pub pending: Vec<PendingTurn>,
    #[serde(default)]
    pub resume_at: ResumePoint,
    /// Milliseconds since the Unix epoch
    pub saved_at: i64,
}

impl ConversationSnapshot {
    /// An empty conversation
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            epoch: 0,
            transcript: vec![],
            usage: vec![],
            pending: vec![],
            resume_at: ResumePoint::AwaitTurn,
            saved_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn total_usage(&self) -> Usage {
        self.usage.iter().sum()
    }

    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            conversation_id: self.conversation_id.clone(),
            epoch: self.epoch,
            entries: self.transcript.len(),
            pending: self.pending.len(),
            total_usage: self.total_usage(),
            saved_at: self.saved_at,
        }
    }
}

/// Summary of a stored snapshot for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub conversation_id: String,
    pub epoch: u32,
    pub entries: usize,
    pub pending: usize,
    pub total_usage: Usage,
    pub saved_at: i64,
}

/// Durable home for conversation snapshots, keyed by conversation id
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot, replacing any previous one for the same conversation
    async fn save(&self, snapshot: &ConversationSnapshot) -> Result<()>;

    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationSnapshot>>;

    /// Forget a conversation. Removing an unknown id is not an error.
    async fn remove(&self, conversation_id: &str) -> Result<()>;

    /// All stored snapshots, newest first
    async fn list(&self) -> Result<Vec<SnapshotInfo>>;
}

/// Conversation ids become file names, so keep them to a safe alphabet.
pub fn validate_conversation_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::Snapshot(format!("invalid conversation id: {:?}", id)))
    }
}

/// One JSON file per conversation in a directory.
///
/// Writes go to a temporary file that is renamed over the old snapshot, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, conversation_id: &str) -> Result<PathBuf> {
        validate_conversation_id(conversation_id)?;
        Ok(self.dir.join(format!("{}.json", conversation_id)))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn save(&self, snapshot: &ConversationSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.conversation_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationSnapshot>> {
        let path = self.path_for(conversation_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, conversation_id: &str) -> Result<()> {
        let path = self.path_for(conversation_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<ConversationSnapshot>(&bytes) {
                Ok(snapshot) => infos.push(snapshot.info()),
                Err(e) => {
                    tracing::warn!("Skipping unreadable snapshot {}: {}", path.display(), e);
                }
            }
        }

        infos.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(infos)
    }
}

/// In-process store; state is lost with the process.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<String, ConversationSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save(&self, snapshot: &ConversationSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .insert(snapshot.conversation_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<ConversationSnapshot>> {
        Ok(self.snapshots.lock().get(conversation_id).cloned())
    }

    async fn remove(&self, conversation_id: &str) -> Result<()> {
        self.snapshots.lock().remove(conversation_id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let mut infos: Vec<SnapshotInfo> =
            self.snapshots.lock().values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(infos)
    }
}

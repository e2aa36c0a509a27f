//! Checkpoint persistence
//!
//! A checkpoint is the state after the last completed node plus the node that
//! must run next. Saves happen between nodes, so a crashed or cancelled run
//! loses at most the node that was in flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redraft_core::{RedraftError, Result, RevisionState};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::state_machine::Node;

/// Persisted snapshot of one conversation's run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub conversation_id: String,
    pub state: RevisionState,
    /// Node to run on resume
    pub next: Node,
    /// Number of nodes completed on this conversation, across runs
    pub step: u64,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Checkpoint for a run that has not executed any node yet
    pub fn start(conversation_id: impl Into<String>, state: RevisionState, step: u64) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            state,
            next: Node::ENTRY,
            step,
            saved_at: Utc::now(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next == Node::End
    }

    /// Record a completed node
    pub fn advance(&mut self, state: RevisionState, next: Node) {
        self.state = state;
        self.next = next;
        self.step += 1;
        self.saved_at = Utc::now();
    }
}

/// Reject ids that are not safe to use as a file stem
pub fn validate_conversation_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(RedraftError::Checkpoint(format!(
            "Invalid conversation id length: {}",
            id.len()
        )));
    }
    if id.starts_with('.')
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(RedraftError::Checkpoint(format!(
            "Invalid conversation id: {:?}",
            id
        )));
    }
    Ok(())
}

/// Compare-and-swap guard: the stored step must be the one the writer read
fn check_expected_step(
    conversation_id: &str,
    stored: Option<&Checkpoint>,
    expected_step: Option<u64>,
) -> Result<()> {
    let stored_step = stored.map(|cp| cp.step);
    if stored_step == expected_step {
        return Ok(());
    }
    Err(RedraftError::CheckpointConflict(format!(
        "{}: expected {} but found {}",
        conversation_id,
        describe_step(expected_step),
        describe_step(stored_step)
    )))
}

fn describe_step(step: Option<u64>) -> String {
    match step {
        Some(step) => format!("step {}", step),
        None => "no checkpoint".to_string(),
    }
}

/// Storage backend for checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint if the stored one is still at `expected_step`
    ///
    /// `None` means no checkpoint may exist yet. Any other stored step is a
    /// `CheckpointConflict`. The check and the write happen under one lock.
    async fn save(&self, checkpoint: &Checkpoint, expected_step: Option<u64>) -> Result<()>;

    async fn load(&self, conversation_id: &str) -> Result<Option<Checkpoint>>;

    /// Returns whether a checkpoint existed
    async fn delete(&self, conversation_id: &str) -> Result<bool>;

    /// Conversation ids with a stored checkpoint, sorted
    async fn list(&self) -> Result<Vec<String>>;
}

/// In-process store, for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint, expected_step: Option<u64>) -> Result<()> {
        validate_conversation_id(&checkpoint.conversation_id)?;
        let mut map = self.checkpoints.write().await;
        check_expected_step(
            &checkpoint.conversation_id,
            map.get(&checkpoint.conversation_id),
            expected_step,
        )?;
        map.insert(checkpoint.conversation_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.read().await.get(conversation_id).cloned())
    }

    async fn delete(&self, conversation_id: &str) -> Result<bool> {
        Ok(self
            .checkpoints
            .write()
            .await
            .remove(conversation_id)
            .is_some())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.checkpoints.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

const LOCK_ATTEMPTS: u32 = 50;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);
/// A lock older than this is left over from a crashed writer
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// Exclusive per-conversation save lock, released on drop
struct SaveLock {
    path: PathBuf,
}

impl Drop for SaveLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified
            .elapsed()
            .map(|age| age > STALE_LOCK_AGE)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// One pretty-printed JSON file per conversation
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a reader never sees a half-written checkpoint. Saves hold an
/// exclusively created `.<id>.lock` file, which makes the step check atomic
/// across processes sharing the directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
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

    async fn lock(&self, conversation_id: &str) -> Result<SaveLock> {
        let path = self.dir.join(format!(".{}.lock", conversation_id));
        for _ in 0..LOCK_ATTEMPTS {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(SaveLock { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await {
                        warn!(lock = %path.display(), "Removing stale checkpoint lock");
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(RedraftError::CheckpointConflict(format!(
            "{}: checkpoint is locked by another writer",
            conversation_id
        )))
    }

    async fn read(path: &Path) -> Result<Option<Checkpoint>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RedraftError::Checkpoint(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&content).map(Some).map_err(|e| {
            RedraftError::Checkpoint(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint, expected_step: Option<u64>) -> Result<()> {
        let path = self.path_for(&checkpoint.conversation_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let _lock = self.lock(&checkpoint.conversation_id).await?;

        let existing = Self::read(&path).await?;
        check_expected_step(&checkpoint.conversation_id, existing.as_ref(), expected_step)?;

        let json = serde_json::to_string_pretty(checkpoint)?;
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            checkpoint.conversation_id,
            uuid::Uuid::new_v4()
        ));
        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(
            conversation = %checkpoint.conversation_id,
            step = checkpoint.step,
            next = %checkpoint.next,
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(conversation_id)?;
        Self::read(&path).await
    }

    async fn delete(&self, conversation_id: &str) -> Result<bool> {
        let path = self.path_for(conversation_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_conversation_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn checkpoint(id: &str, step: u64) -> Checkpoint {
        let mut cp = Checkpoint::start(id, RevisionState::new("hello").unwrap(), 0);
        cp.step = step;
        cp
    }

    #[test]
    fn test_conversation_id_validation() {
        assert!(validate_conversation_id("conv-1_a.b").is_ok());
        assert!(validate_conversation_id("").is_err());
        assert!(validate_conversation_id("../etc/passwd").is_err());
        assert!(validate_conversation_id(".hidden").is_err());
        assert!(validate_conversation_id("a/b").is_err());
        assert!(validate_conversation_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_advance() {
        let mut cp = checkpoint("c", 0);
        assert_eq!(cp.next, Node::Writer);
        assert!(!cp.is_finished());

        let mut state = cp.state.clone();
        state.record_draft("d");
        cp.advance(state, Node::Reviewer);
        assert_eq!(cp.step, 1);
        assert_eq!(cp.next, Node::Reviewer);
        assert_eq!(cp.state.revision_count(), 1);

        cp.advance(cp.state.clone(), Node::End);
        assert!(cp.is_finished());
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load("c1").await.unwrap().is_none());

        store.save(&checkpoint("c1", 1), None).await.unwrap();
        store.save(&checkpoint("c0", 1), None).await.unwrap();
        assert_eq!(store.load("c1").await.unwrap().unwrap().step, 1);
        assert_eq!(store.list().await.unwrap(), vec!["c0", "c1"]);

        assert!(store.delete("c1").await.unwrap());
        assert!(!store.delete("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_compare_and_swap() {
        let store = MemoryCheckpointStore::new();
        store.save(&checkpoint("c", 0), None).await.unwrap();

        // a second fresh start on the same conversation loses
        assert!(matches!(
            store.save(&checkpoint("c", 0), None).await,
            Err(RedraftError::CheckpointConflict(_))
        ));

        store.save(&checkpoint("c", 1), Some(0)).await.unwrap();

        // another writer that also read step 0 must not overwrite step 1
        let err = store.save(&checkpoint("c", 1), Some(0)).await.unwrap_err();
        assert!(matches!(err, RedraftError::CheckpointConflict(_)));
        assert!(matches!(
            store.save(&checkpoint("c", 2), Some(5)).await,
            Err(RedraftError::CheckpointConflict(_))
        ));
        assert_eq!(store.load("c").await.unwrap().unwrap().step, 1);
    }

    #[tokio::test]
    async fn test_memory_store_concurrent_savers_one_wins() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.save(&checkpoint("c", 0), None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.save(&checkpoint("c", 1), Some(0)).await.is_ok()
            }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp.path().join("checkpoints"));

        assert!(store.list().await.unwrap().is_empty());
        assert!(store.load("conv").await.unwrap().is_none());

        let mut cp = checkpoint("conv", 0);
        let mut state = cp.state.clone();
        state.record_draft("first draft");
        store.save(&cp, None).await.unwrap();
        cp.advance(state, Node::Reviewer);
        store.save(&cp, Some(0)).await.unwrap();

        let loaded = store.load("conv").await.unwrap().unwrap();
        assert_eq!(loaded, cp);
        assert_eq!(store.list().await.unwrap(), vec!["conv"]);

        // no temp or lock files left behind
        let mut names = Vec::new();
        for entry in std::fs::read_dir(store.dir()).unwrap() {
            names.push(entry.unwrap().file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["conv.json"]);

        assert!(store.delete("conv").await.unwrap());
        assert!(store.load("conv").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_compare_and_swap_across_instances() {
        let temp = TempDir::new().unwrap();
        // two handles on one directory, as two processes would have
        let first = FileCheckpointStore::new(temp.path());
        let second = FileCheckpointStore::new(temp.path());

        first.save(&checkpoint("c", 0), None).await.unwrap();
        assert!(matches!(
            second.save(&checkpoint("c", 0), None).await,
            Err(RedraftError::CheckpointConflict(_))
        ));

        first.save(&checkpoint("c", 1), Some(0)).await.unwrap();
        assert!(matches!(
            second.save(&checkpoint("c", 1), Some(0)).await,
            Err(RedraftError::CheckpointConflict(_))
        ));
        second.save(&checkpoint("c", 2), Some(1)).await.unwrap();
        assert_eq!(first.load("c").await.unwrap().unwrap().step, 2);
    }

    #[tokio::test]
    async fn test_file_store_held_lock_blocks_save() {
        let temp = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp.path());
        let lock = temp.path().join(".c.lock");
        std::fs::write(&lock, "").unwrap();

        assert!(matches!(
            store.save(&checkpoint("c", 0), None).await,
            Err(RedraftError::CheckpointConflict(_))
        ));
        assert!(store.load("c").await.unwrap().is_none());

        std::fs::remove_file(&lock).unwrap();
        store.save(&checkpoint("c", 0), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_corrupt_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("bad.json"), "{not json").unwrap();
        let store = FileCheckpointStore::new(temp.path());
        assert!(matches!(
            store.load("bad").await,
            Err(RedraftError::Checkpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_file_store_rejects_unsafe_id() {
        let temp = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(temp.path());
        assert!(store.load("../escape").await.is_err());
    }
}

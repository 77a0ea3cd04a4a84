//! JSON File Memory Store
//!
//! Keeps a memory collection in a single JSON file so it survives restarts.
//! Ranking happens in process over the loaded entries; every mutation writes
//! a fresh snapshot to a staging file and renames it over the original.

use std::path::{Path, PathBuf};

use agent_core::{
    error::{AgentError, Result},
    memory::{DistanceMetric, InMemoryStore, MemoryEntry, MemoryStore, ScoredEntry},
};
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

/// File-backed [`MemoryStore`]
pub struct JsonFileStore {
    path: PathBuf,
    entries: InMemoryStore,
    /// Serializes mutate-then-write so snapshots land in order
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Load `path`, or start empty when it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries: Vec<MemoryEntry> = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                AgentError::Config(format!("memory file {} is unreadable: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = %path.display(), entries = entries.len(), "Opened memory file");

        Ok(Self {
            path,
            entries: InMemoryStore::with_entries(entries),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.entries.snapshot().await)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        tracing::trace!(path = %self.path.display(), "Saved memory file");
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for JsonFileStore {
    async fn insert(&self, entry: MemoryEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.entries.insert(entry).await?;
        self.persist().await
    }

    async fn nearest(
        &self,
        query: &[f32],
        metric: DistanceMetric,
        limit: usize,
    ) -> Result<Vec<ScoredEntry>> {
        self.entries.nearest(query, metric, limit).await
    }

    async fn find_text(&self, text: &str) -> Result<Option<Uuid>> {
        self.entries.find_text(text).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let removed = self.entries.delete(id).await?;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.entries.clear().await?;
        self.persist().await
    }

    async fn len(&self) -> Result<usize> {
        self.entries.len().await
    }

    fn next_sequence(&self) -> u64 {
        self.entries.next_sequence()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use agent_core::{HashEmbedder, MemorySettings, VectorMemory};

    use super::*;

    fn scratch_file(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("agent-memory-{label}-{}-{nanos}", std::process::id()))
            .join("memory.json")
    }

    fn open_memory(path: &Path) -> VectorMemory {
        let settings = MemorySettings {
            dimension: 64,
            ..MemorySettings::default()
        };
        let store = Arc::new(JsonFileStore::open(path).unwrap());
        VectorMemory::new(Arc::new(HashEmbedder::new(64)), store, &settings).unwrap()
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let path = scratch_file("reopen");

        let first = open_memory(&path);
        first.add("The capital of France is Paris", None).await.unwrap();
        let kept = first.add("Rust has no garbage collector", None).await.unwrap();
        let dropped = first.add("temporary note", None).await.unwrap();
        assert!(first.delete(dropped).await.unwrap());
        drop(first);

        let reopened = open_memory(&path);
        assert_eq!(reopened.len().await.unwrap(), 2);

        let hits = reopened.search_scored("Rust garbage collector", 1).await.unwrap();
        assert_eq!(hits[0].entry.id, kept);

        // New entries continue the saved insertion order
        let newest = reopened.add("Rust has no garbage collector", None).await.unwrap();
        let hits = reopened.search_scored("Rust has no garbage collector", 2).await.unwrap();
        assert_eq!(hits[0].entry.id, newest);
        assert_eq!(hits[0].entry.sequence, 2);

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_clear_empties_the_file() {
        let path = scratch_file("clear");

        let memory = open_memory(&path);
        memory.add("something to forget", None).await.unwrap();
        memory.clear().await.unwrap();
        drop(memory);

        assert_eq!(open_memory(&path).len().await.unwrap(), 0);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_config_error() {
        let path = scratch_file("corrupt");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not a list").unwrap();

        assert!(matches!(JsonFileStore::open(&path), Err(AgentError::Config(_))));
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}

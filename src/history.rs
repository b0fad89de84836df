use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::model::{GenerationResult, HistoryEntry};
use crate::storage::KvStore;
use crate::utils::{now_iso, now_millis};

pub const HISTORY_STORAGE_KEY: &str = "ai-image-studio-history";
pub const HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Error)]
enum PersistenceError {
    #[error("stored history is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("history storage unavailable: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Newest-first, capacity-bounded log of generated images. Storage problems
/// are logged and recovered from; callers never see them.
pub struct HistoryStore<K> {
    store: Arc<K>,
    capacity: usize,
}

impl<K> Clone for HistoryStore<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            capacity: self.capacity,
        }
    }
}

impl<K: KvStore> HistoryStore<K> {
    pub fn new(store: Arc<K>) -> Self {
        Self {
            store,
            capacity: HISTORY_CAPACITY,
        }
    }

    pub async fn load(&self) -> Vec<HistoryEntry> {
        match self.read().await {
            Ok(entries) => {
                debug!(count = entries.len(), "history loaded");
                entries
            }
            Err(e @ PersistenceError::Malformed(_)) => {
                warn!(error = %e, "discarding stored history");
                if let Err(e) = self.store.remove(HISTORY_STORAGE_KEY).await {
                    error!(error = %e, "failed to drop malformed history");
                }
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "history unavailable, starting empty");
                Vec::new()
            }
        }
    }

    async fn read(&self) -> Result<Vec<HistoryEntry>, PersistenceError> {
        let Some(raw) = self.store.get(HISTORY_STORAGE_KEY).await? else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<HistoryEntry> = serde_json::from_str(&raw)?;
        entries.truncate(self.capacity);
        Ok(entries)
    }

    /// Prepends `result` with a fresh id and timestamp, evicts the oldest
    /// entries beyond capacity, persists and returns the new log.
    pub async fn record(
        &self,
        result: GenerationResult,
        history: &[HistoryEntry],
    ) -> Vec<HistoryEntry> {
        let id = next_id(now_millis(), history.first().map(|e| e.id));
        let entry = HistoryEntry::from_result(id, now_iso(), result);

        let mut updated = Vec::with_capacity(self.capacity);
        updated.push(entry);
        updated.extend(history.iter().take(self.capacity.saturating_sub(1)).cloned());

        if let Err(e) = self.write(&updated).await {
            warn!(error = %e, "history not persisted");
        }
        updated
    }

    async fn write(&self, entries: &[HistoryEntry]) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(entries)?;
        self.store.set(HISTORY_STORAGE_KEY, &json).await?;
        Ok(())
    }

    pub async fn clear(&self) {
        if let Err(e) = self.store.remove(HISTORY_STORAGE_KEY).await {
            error!(error = %e, "failed to clear stored history");
        }
    }
}

/// Time-derived ids that still increase when two results land in the same
/// millisecond or the clock steps back.
fn next_id(now_ms: i64, newest: Option<i64>) -> i64 {
    match newest {
        Some(newest) if newest >= now_ms => newest + 1,
        _ => now_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, SqliteStore};

    fn result(n: u32) -> GenerationResult {
        GenerationResult {
            image_data_url: format!("data:image/png;base64,{n}"),
            width: n,
            height: n,
            size_kb: 1,
            generated_at: now_iso(),
        }
    }

    #[tokio::test]
    async fn record_keeps_twenty_newest_first() {
        let store = Arc::new(MemoryStore::new());
        let history = HistoryStore::new(store.clone());
        let mut entries = history.load().await;
        assert!(entries.is_empty());

        for n in 0..25 {
            entries = history.record(result(n), &entries).await;
            assert!(entries.len() <= HISTORY_CAPACITY);
        }

        assert_eq!(entries.len(), HISTORY_CAPACITY);
        assert_eq!(entries[0].width, 24);
        assert_eq!(entries[HISTORY_CAPACITY - 1].width, 5);
        assert!(entries.windows(2).all(|w| w[0].id > w[1].id));

        let reloaded = history.load().await;
        assert_eq!(reloaded, entries);
    }

    #[tokio::test]
    async fn malformed_history_is_dropped_from_storage() {
        let store = Arc::new(MemoryStore::new());
        store.set(HISTORY_STORAGE_KEY, "{not json").await.unwrap();
        let history = HistoryStore::new(store.clone());

        assert!(history.load().await.is_empty());
        assert_eq!(store.get(HISTORY_STORAGE_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn reads_camel_case_history_records() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                HISTORY_STORAGE_KEY,
                r#"[{"id":1718000000000,"imageDataUrl":"data:image/jpeg;base64,AA==","width":1024,"height":1024,"size":412,"createdAt":"2024-06-10T06:13:20.000Z"}]"#,
            )
            .await
            .unwrap();
        let entries = HistoryStore::new(store).load().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].size_kb, 412);
        assert_eq!(entries[0].id, 1718000000000);
    }

    #[tokio::test]
    async fn clear_removes_persisted_history() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let history = HistoryStore::new(store.clone());
        let entries = history.record(result(1), &[]).await;
        assert_eq!(history.load().await, entries);

        history.clear().await;
        assert!(history.load().await.is_empty());
    }

    #[tokio::test]
    async fn failed_write_still_returns_updated_log() {
        struct ReadOnly(MemoryStore);
        impl KvStore for ReadOnly {
            async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
                self.0.get(key).await
            }
            async fn set(&self, _: &str, _: &str) -> anyhow::Result<()> {
                anyhow::bail!("quota exceeded")
            }
            async fn remove(&self, key: &str) -> anyhow::Result<()> {
                self.0.remove(key).await
            }
        }

        let history = HistoryStore::new(Arc::new(ReadOnly(MemoryStore::new())));
        let entries = history.record(result(7), &[]).await;
        assert_eq!(entries.len(), 1);
        assert!(history.load().await.is_empty());
    }

    #[test]
    fn ids_are_monotonic() {
        assert_eq!(next_id(1000, None), 1000);
        assert_eq!(next_id(1000, Some(999)), 1000);
        assert_eq!(next_id(1000, Some(1000)), 1001);
        assert_eq!(next_id(1000, Some(5000)), 5001);
    }
}

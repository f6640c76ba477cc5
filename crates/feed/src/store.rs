//! Key-value stores behind the cache-aside layer.
//!
//! Entries are replaced whole (last write wins). Freshness is the caller's
//! concern; stores only remember when an entry was saved.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One stored value with its save time and free-form metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: serde_json::Value,
    pub saved_at_ms: i64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl CacheEntry {
    pub fn new(key: &str, payload: serde_json::Value, saved_at_ms: i64) -> Self {
        Self {
            key: key.to_string(),
            payload,
            saved_at_ms,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.saved_at_ms
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn set(&self, entry: CacheEntry) -> Result<()>;
}

/// Process-local store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

/// Escape everything outside `[A-Za-z0-9._-]` so distinct keys never share
/// a file name.
fn file_stem(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(byte as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }

    /// A temp path no other in-flight write uses.
    fn tmp_path_for(&self, key: &str) -> PathBuf {
        static NEXT_WRITE: AtomicU64 = AtomicU64::new(0);
        let n = NEXT_WRITE.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}.json.{}.{}.tmp",
            file_stem(key),
            std::process::id(),
            n
        ))
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Store(format!("read {}: {}", path.display(), e))),
        };
        let entry: CacheEntry = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Store(format!("decode {}: {}", path.display(), e)))?;
        Ok(Some(entry))
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Store(format!("create {}: {}", self.dir.display(), e)))?;

        let path = self.path_for(&entry.key);
        let tmp = self.tmp_path_for(&entry.key);
        let bytes = serde_json::to_vec(&entry)?;

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::Store(format!("write {}: {}", tmp.display(), e)))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Store(format!("rename {}: {}", path.display(), e)));
        }

        debug!("Stored {} ({} bytes) at {}", entry.key, bytes.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_last_write_wins() {
        let store = MemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());

        store.set(CacheEntry::new("k", json!(1), 10)).await.unwrap();
        store
            .set(CacheEntry::new("k", json!({"v": 2}), 20).with_metadata(json!({"max_ts": 5})))
            .await
            .unwrap();

        let entry = store.get("k").await.unwrap().expect("entry should exist");
        assert_eq!(entry.payload, json!({"v": 2}));
        assert_eq!(entry.saved_at_ms, 20);
        assert_eq!(entry.metadata["max_ts"], 5);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_stem_is_unambiguous() {
        assert_eq!(file_stem("rows:UTIS0001:24h:v1"), "rows%3AUTIS0001%3A24h%3Av1");
        assert_ne!(file_stem("latest:A"), file_stem("latest_A"));
        assert_eq!(file_stem("a/b"), "a%2Fb");
    }

    #[tokio::test]
    async fn test_file_store_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("cache"));

        assert!(store.get("latest:UTIS0001").await.unwrap().is_none());

        let entry = CacheEntry::new("latest:UTIS0001", json!({"latest": {"th": null}}), 42);
        store.set(entry.clone()).await.unwrap();
        assert_eq!(store.get("latest:UTIS0001").await.unwrap(), Some(entry));

        let leftovers: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files should be renamed away");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_store_concurrent_writers_on_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()));

        for round in 0..20 {
            let mut handles = Vec::new();
            for writer in 0..8 {
                let store = store.clone();
                handles.push(tokio::spawn(async move {
                    let entry = CacheEntry::new("latest:all:24h", json!({"writer": writer}), round);
                    store.set(entry).await
                }));
            }
            for handle in handles {
                handle.await.unwrap().expect("every concurrent write should land");
            }

            let entry = store.get("latest:all:24h").await.unwrap().expect("entry");
            assert_eq!(entry.saved_at_ms, round);
            assert!((0..8).contains(&entry.payload["writer"].as_i64().unwrap()));
        }

        let files: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, vec!["latest%3Aall%3A24h.json".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_corrupt_entry_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        std::fs::write(store.path_for("bad"), b"{not json").unwrap();

        let err = store.get("bad").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)), "got {:?}", err);
    }
}

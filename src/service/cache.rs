//! Persistent query cache.
//!
//! Memoizes remote query results on disk, keyed by function name and query
//! text. The endpoint address is deliberately not part of the key, so
//! endpoints serving the same snapshot share entries.
//!
//! ```text
//! <root>/<function>/<sha256(function \0 query)>/output.json
//! ```
//!
//! Each entry is written to a private temp file and renamed into place, so
//! concurrent writers never interleave bytes: distinct keys never collide,
//! and for the same key the last rename wins with a complete file either way.
//!
//! A capacity-bounded `moka` cache fronts the directory; evicted entries are
//! read back from disk on the next lookup.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{Error, Result};

const ENTRY_FILE: &str = "output.json";

/// Default number of values held in memory.
pub const DEFAULT_HOT_CAPACITY: u64 = 10_000;

/// On-disk envelope around a cached value.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
    query: String,
    cached_at: DateTime<Utc>,
    value: T,
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

/// Process-wide query memo backed by a directory.
pub struct QueryCache {
    root: PathBuf,
    /// Hot layer: serialized values recently read or written by this process.
    memory: Cache<String, serde_json::Value>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    temp_counter: AtomicU64,
}

impl QueryCache {
    /// Open (lazily creating) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::with_capacity(root, DEFAULT_HOT_CAPACITY)
    }

    /// Like [`open`](Self::open), holding at most `capacity` values in memory.
    pub fn with_capacity(root: impl Into<PathBuf>, capacity: u64) -> Self {
        Self {
            root: root.into(),
            memory: Cache::builder().max_capacity(capacity).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            temp_counter: AtomicU64::new(0),
        }
    }

    /// `<user cache dir>/kgqa-signatures`, or `./.kgqa-cache` without one.
    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join("kgqa-signatures"))
            .unwrap_or_else(|| PathBuf::from(".kgqa-cache"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }

    /// Values currently held in memory. Eviction runs in the background, so
    /// call [`sync`](Self::sync) first for an exact figure.
    pub fn hot_entries(&self) -> u64 {
        self.memory.entry_count()
    }

    /// Apply pending evictions of the in-memory layer.
    pub async fn sync(&self) {
        self.memory.run_pending_tasks().await;
    }

    /// Stable hex key for `(function, query)`.
    pub fn key(function: &str, query: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(function.as_bytes());
        hasher.update([0u8]);
        hasher.update(query.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn entry_dir(&self, function: &str, key: &str) -> PathBuf {
        self.root.join(function).join(key)
    }

    /// Look up a cached value. Unreadable entries count as misses.
    pub async fn get<T: DeserializeOwned>(&self, function: &str, query: &str) -> Option<T> {
        let key = Self::key(function, query);

        if let Some(value) = self.memory.get(&key).await {
            if let Ok(value) = serde_json::from_value(value) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(function, key = %key, "Query cache hit (memory)");
                return Some(value);
            }
        }

        let path = self.entry_dir(function, &key).join(ENTRY_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match serde_json::from_slice::<CacheEntry<serde_json::Value>>(&bytes) {
            Ok(entry) => match serde_json::from_value::<T>(entry.value.clone()) {
                Ok(value) => {
                    self.memory.insert(key.clone(), entry.value).await;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(function, key = %key, cached_at = %entry.cached_at, "Query cache hit (disk)");
                    Some(value)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cached value has unexpected shape; ignoring");
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt cache entry; ignoring");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` for `(function, query)`.
    pub async fn put<T: Serialize>(&self, function: &str, query: &str, value: &T) -> Result<()> {
        let key = Self::key(function, query);
        let dir = self.entry_dir(function, &key);
        let value = serde_json::to_value(value)?;

        let entry = CacheEntry {
            query: query.to_string(),
            cached_at: Utc::now(),
            value: &value,
        };
        let bytes = serde_json::to_vec(&entry)?;

        tokio::fs::create_dir_all(&dir).await.map_err(|e| cache_error(&dir, e))?;
        let temp = dir.join(format!(
            ".{ENTRY_FILE}.{}.{}.tmp",
            std::process::id(),
            self.temp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp, &bytes).await.map_err(|e| cache_error(&temp, e))?;
        let target = dir.join(ENTRY_FILE);
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(cache_error(&target, e));
        }

        self.memory.insert(key, value).await;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("root", &self.root)
            .field("hot_entries", &self.memory.entry_count())
            .field("stats", &self.stats())
            .finish()
    }
}

fn cache_error(path: &Path, e: std::io::Error) -> Error {
    Error::Cache {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_is_stable_and_function_scoped() {
        let a = QueryCache::key("execute_sparql_request", "SELECT 1");
        let b = QueryCache::key("execute_sparql_request", "SELECT 1");
        let c = QueryCache::key("other", "SELECT 1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_put_then_get_from_fresh_instance() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryCache::open(dir.path());
        assert_eq!(cache.get::<Vec<u32>>("f", "q").await, None);

        cache.put("f", "q", &vec![1u32, 2, 3]).await.unwrap();
        assert_eq!(cache.get::<Vec<u32>>("f", "q").await, Some(vec![1, 2, 3]));

        // a second process sees the disk entry
        let reopened = QueryCache::open(dir.path());
        assert_eq!(reopened.get::<Vec<u32>>("f", "q").await, Some(vec![1, 2, 3]));
        assert_eq!(reopened.stats(), CacheStats { hits: 1, misses: 0, writes: 0 });
    }

    #[tokio::test]
    async fn test_hot_layer_stays_within_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryCache::with_capacity(dir.path(), 32);
        for i in 0..500u32 {
            cache.put("f", &format!("q{i}"), &i).await.unwrap();
        }
        cache.sync().await;
        assert!(cache.hot_entries() <= 32, "held {}", cache.hot_entries());

        // evicted values are still served from disk
        assert_eq!(cache.get::<u32>("f", "q0").await, Some(0));
        assert_eq!(cache.stats().writes, 500);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = QueryCache::open(dir.path());
        let key = QueryCache::key("f", "q");
        let entry_dir = dir.path().join("f").join(&key);
        std::fs::create_dir_all(&entry_dir).unwrap();
        std::fs::write(entry_dir.join(ENTRY_FILE), b"{not json").unwrap();

        assert_eq!(cache.get::<Vec<u32>>("f", "q").await, None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_distinct_and_same_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = std::sync::Arc::new(QueryCache::open(dir.path()));

        let mut tasks = Vec::new();
        for i in 0..16u32 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                cache.put("f", &format!("q{i}"), &i).await.unwrap();
                cache.put("f", "shared", &i).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let fresh = QueryCache::open(dir.path());
        for i in 0..16u32 {
            assert_eq!(fresh.get::<u32>("f", &format!("q{i}")).await, Some(i));
        }
        let shared = fresh.get::<u32>("f", "shared").await.unwrap();
        assert!(shared < 16);
    }
}

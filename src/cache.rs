//! Content-addressed cache of whole-pipeline results.
//!
//! Entries are keyed by a SHA-256 over the exact analysed content followed by
//! the analysis type, so any change to either is a different key. Expiry is
//! lazy on read, with [`ResultCache::sweep_expired`] for bulk eviction. There
//! is no locking: a sweep racing a read can at worst turn a hit into a miss.

use crate::clock::{Clock, SystemClock};
use crate::errors::StoreError;
use crate::util::sha256_hex;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Default time-to-live for cache entries (24 hours).
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// On-disk cache record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub timestamp: DateTime<Utc>,
    pub content_hash: String,
    pub analysis_type: String,
    pub payload: Value,
}

/// Snapshot of the cache directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub expired: usize,
}

pub struct ResultCache {
    dir: PathBuf,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: std::time::Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for `(content, analysis_type)`.
    pub fn key(content: &str, analysis_type: &str) -> String {
        sha256_hex(&[content, analysis_type])
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.clock.now() - entry.timestamp > self.ttl
    }

    /// Look up a cached payload. Any read or parse failure is a miss.
    pub async fn get(&self, content: &str, analysis_type: &str) -> Option<Value> {
        let key = Self::key(content, analysis_type);
        let path = self.entry_path(&key);

        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache read failed; treating as miss");
                return None;
            }
        };
        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "corrupt cache entry; treating as miss");
                return None;
            }
        };

        if self.is_expired(&entry) {
            tracing::debug!(key = %key, analysis_type, "cache entry expired");
            if let Err(e) = fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(key = %key, error = %e, "failed to evict expired cache entry");
            }
            return None;
        }

        tracing::debug!(key = %key, analysis_type, "cache hit");
        Some(entry.payload)
    }

    /// Store `payload` for `(content, analysis_type)`, replacing any previous entry.
    pub async fn set(
        &self,
        content: &str,
        analysis_type: &str,
        payload: Value,
    ) -> Result<(), StoreError> {
        let key = Self::key(content, analysis_type);
        let entry = CacheEntry {
            timestamp: self.clock.now(),
            content_hash: key.clone(),
            analysis_type: analysis_type.to_string(),
            payload,
        };
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;
        let path = self.entry_path(&key);
        let json = serde_json::to_vec(&entry).map_err(|e| StoreError::serialization(&path, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        tracing::debug!(key = %key, analysis_type, "cached result");
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(PathBuf, Option<CacheEntry>)>, StoreError> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };
        let mut out = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let path = item.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let entry = fs::read(&path)
                .await
                .ok()
                .and_then(|raw| serde_json::from_slice::<CacheEntry>(&raw).ok());
            out.push((path, entry));
        }
        Ok(out)
    }

    /// Remove every expired (or unreadable) entry; returns how many were removed.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for (path, entry) in self.entries().await? {
            let stale = entry.as_ref().is_none_or(|e| self.is_expired(e));
            if !stale {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                // Raced with a lazy eviction.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        if removed > 0 {
            tracing::info!(removed, "swept expired cache entries");
        }
        Ok(removed)
    }

    /// Remove every entry regardless of age.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for (path, _) in self.entries().await? {
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats, StoreError> {
        let entries = self.entries().await?;
        let expired = entries
            .iter()
            .filter(|(_, e)| e.as_ref().is_none_or(|e| self.is_expired(e)))
            .count();
        Ok(CacheStats {
            entries: entries.len(),
            expired,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use tempfile::TempDir;

    fn make_cache(ttl_secs: u64) -> (ResultCache, Arc<ManualClock>, TempDir) {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ttl = std::time::Duration::from_secs(ttl_secs);
        let cache = ResultCache::new(dir.path().join("cache"), ttl).with_clock(clock.clone());
        (cache, clock, dir)
    }

    #[tokio::test]
    async fn test_set_then_get_returns_payload() {
        let (cache, _clock, _dir) = make_cache(60);
        cache
            .set("fn main() {}", "review_security", json!({"report": "ok"}))
            .await
            .unwrap();
        assert_eq!(
            cache.get("fn main() {}", "review_security").await,
            Some(json!({"report": "ok"}))
        );
    }

    #[tokio::test]
    async fn test_different_content_or_type_misses() {
        let (cache, _clock, _dir) = make_cache(60);
        cache.set("code", "full_review", json!(1)).await.unwrap();
        assert!(cache.get("code ", "full_review").await.is_none());
        assert!(cache.get("code", "review_security").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_and_removed() {
        let (cache, clock, _dir) = make_cache(60);
        cache.set("code", "full_review", json!(1)).await.unwrap();
        let path = cache.entry_path(&ResultCache::key("code", "full_review"));
        assert!(path.exists());

        clock.advance(Duration::seconds(61));
        assert!(cache.get("code", "full_review").await.is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_entry_within_ttl_survives() {
        let (cache, clock, _dir) = make_cache(60);
        cache.set("code", "full_review", json!(1)).await.unwrap();
        clock.advance(Duration::seconds(59));
        assert_eq!(cache.get("code", "full_review").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let (cache, _clock, _dir) = make_cache(60);
        std::fs::create_dir_all(cache.dir()).unwrap();
        std::fs::write(cache.entry_path(&ResultCache::key("c", "t")), "not json").unwrap();
        assert!(cache.get("c", "t").await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (cache, clock, _dir) = make_cache(60);
        cache.set("old", "full_review", json!(1)).await.unwrap();
        clock.advance(Duration::seconds(45));
        cache.set("new", "full_review", json!(2)).await.unwrap();
        clock.advance(Duration::seconds(30));

        assert_eq!(
            cache.stats().await.unwrap(),
            CacheStats {
                entries: 2,
                expired: 1
            }
        );
        assert_eq!(cache.sweep_expired().await.unwrap(), 1);
        assert!(cache.get("old", "full_review").await.is_none());
        assert_eq!(cache.get("new", "full_review").await, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_sweep_and_clear_on_missing_dir() {
        let (cache, _clock, _dir) = make_cache(60);
        assert_eq!(cache.sweep_expired().await.unwrap(), 0);
        assert_eq!(cache.clear().await.unwrap(), 0);
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
    }

    #[tokio::test]
    async fn test_clear_removes_everything() {
        let (cache, _clock, _dir) = make_cache(60);
        cache.set("a", "t", json!(1)).await.unwrap();
        cache.set("b", "t", json!(2)).await.unwrap();
        assert_eq!(cache.clear().await.unwrap(), 2);
        assert!(cache.get("a", "t").await.is_none());
    }

    #[test]
    fn test_key_is_deterministic() {
        assert_eq!(ResultCache::key("x", "t"), ResultCache::key("x", "t"));
        assert_ne!(ResultCache::key("x", "t"), ResultCache::key("x", "u"));
    }
}

//! Durable transcription cache, keyed by source URL.
//!
//! Transcribing a clip costs a provider round trip and real money; the
//! same clip recurs across rundowns whenever a user re-edits a game. One
//! self-contained JSON file per entry keeps the store portable and makes
//! eviction a directory scan.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::models::Word;

pub const SCHEMA_VERSION: u32 = 1;

/// Persisted shape of one cached transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub schema_version: u32,
    pub source_url: String,
    pub words: Vec<Word>,
    pub duration: f64,
    pub created_at: DateTime<Utc>,
}

/// File-backed cache with TTL expiry and an oldest-half eviction policy.
///
/// All mutation runs under one async guard; the single-flight table in
/// the transcription service keeps concurrent misses for the same URL
/// from racing each other at the provider.
#[derive(Debug)]
pub struct TranscriptCache {
    dir: PathBuf,
    ttl: Duration,
    max_entries: usize,
    guard: Mutex<()>,
}

impl TranscriptCache {
    pub fn new(config: &Config) -> Self {
        Self {
            dir: config.transcript_cache_dir.clone(),
            ttl: Duration::days(config.transcript_ttl_days),
            max_entries: config.cache_max_entries,
            guard: Mutex::new(()),
        }
    }

    /// Fresh words and duration for a URL, or `None` on miss/expiry.
    pub async fn get(&self, source_url: &str) -> Result<Option<(Vec<Word>, f64)>> {
        let _guard = self.guard.lock().await;
        let path = self.entry_path(source_url);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(None),
        };

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("dropping unreadable cache entry {}: {}", path.display(), e);
                let _ = tokio::fs::remove_file(&path).await;
                return Ok(None);
            }
        };

        if entry.schema_version != SCHEMA_VERSION {
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        if Utc::now() - entry.created_at > self.ttl {
            debug!("cache entry expired for {source_url}");
            let _ = tokio::fs::remove_file(&path).await;
            return Ok(None);
        }

        debug!("transcript cache hit for {source_url}");
        Ok(Some((entry.words, entry.duration)))
    }

    /// Store a transcription, then evict if the store has outgrown its cap.
    pub async fn put(&self, source_url: &str, words: &[Word], duration: f64) -> Result<()> {
        let _guard = self.guard.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;

        let entry = CacheEntry {
            schema_version: SCHEMA_VERSION,
            source_url: source_url.to_string(),
            words: words.to_vec(),
            duration,
            created_at: Utc::now(),
        };
        let path = self.entry_path(source_url);
        tokio::fs::write(&path, serde_json::to_vec_pretty(&entry)?).await?;

        self.evict_oldest_if_needed().await
    }

    /// When the entry count exceeds the cap, drop the oldest half.
    async fn evict_oldest_if_needed(&self) -> Result<()> {
        let mut entries: Vec<(DateTime<Utc>, PathBuf)> = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let created_at = tokio::fs::read(&path)
                .await
                .ok()
                .and_then(|bytes| serde_json::from_slice::<CacheEntry>(&bytes).ok())
                .map(|entry| entry.created_at)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            entries.push((created_at, path));
        }

        if entries.len() <= self.max_entries {
            return Ok(());
        }

        entries.sort_by_key(|(created_at, _)| *created_at);
        let drop_count = entries.len() / 2;
        warn!(
            "transcript cache at {} entries (cap {}); evicting the oldest {}",
            entries.len(),
            self.max_entries,
            drop_count
        );
        for (_, path) in entries.into_iter().take(drop_count) {
            let _ = tokio::fs::remove_file(&path).await;
        }
        Ok(())
    }

    fn entry_path(&self, source_url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(source_url.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        self.dir.join(format!("{hash}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cache(dir: &std::path::Path, max_entries: usize) -> TranscriptCache {
        let config = Config {
            transcript_cache_dir: dir.to_path_buf(),
            cache_max_entries: max_entries,
            ..Config::default()
        };
        TranscriptCache::new(&config)
    }

    fn words() -> Vec<Word> {
        vec![
            Word { text: "home".into(), start: 0.5, end: 0.8, confidence: 0.98 },
            Word { text: "run".into(), start: 0.8, end: 1.1, confidence: 0.97 },
        ]
    }

    #[tokio::test]
    async fn round_trip_returns_exactly_what_was_stored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 50);

        let url = "https://mediadownloads.mlb.com/clip.mp4";
        cache.put(url, &words(), 10.0).await.unwrap();

        let (got_words, duration) = cache.get(url).await.unwrap().unwrap();
        assert_eq!(got_words, words());
        assert_eq!(duration, 10.0);
    }

    #[tokio::test]
    async fn miss_for_unknown_url() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 50);
        assert!(cache.get("https://unknown.example.com/x.mp4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 50);
        let url = "https://mediadownloads.mlb.com/old.mp4";

        // Write an entry dated beyond the TTL directly to disk.
        let stale = CacheEntry {
            schema_version: SCHEMA_VERSION,
            source_url: url.to_string(),
            words: words(),
            duration: 10.0,
            created_at: Utc::now() - Duration::days(8),
        };
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(
            cache.entry_path(url),
            serde_json::to_vec(&stale).unwrap(),
        )
        .unwrap();

        assert!(cache.get(url).await.unwrap().is_none());
        assert!(!cache.entry_path(url).exists(), "expired file should be removed");
    }

    #[tokio::test]
    async fn unknown_schema_version_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 50);
        let url = "https://mediadownloads.mlb.com/v2.mp4";

        let future_entry = CacheEntry {
            schema_version: SCHEMA_VERSION + 1,
            source_url: url.to_string(),
            words: words(),
            duration: 10.0,
            created_at: Utc::now(),
        };
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(
            cache.entry_path(url),
            serde_json::to_vec(&future_entry).unwrap(),
        )
        .unwrap();

        assert!(cache.get(url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_entries_are_removed_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 50);
        let url = "https://mediadownloads.mlb.com/corrupt.mp4";

        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(cache.entry_path(url), b"{ not json").unwrap();

        assert!(cache.get(url).await.unwrap().is_none());
        assert!(!cache.entry_path(url).exists());
    }

    #[tokio::test]
    async fn eviction_drops_the_oldest_half() {
        let dir = tempfile::tempdir().unwrap();
        let cache = test_cache(dir.path(), 4);

        // Backdate four entries so their age order is unambiguous, then
        // push a fifth through the public API to trigger eviction.
        std::fs::create_dir_all(dir.path()).unwrap();
        for i in 0..4 {
            let url = format!("https://cdn.example.com/clip-{i}.mp4");
            let entry = CacheEntry {
                schema_version: SCHEMA_VERSION,
                source_url: url.clone(),
                words: words(),
                duration: 10.0,
                created_at: Utc::now() - Duration::hours(24 - i),
            };
            std::fs::write(cache.entry_path(&url), serde_json::to_vec(&entry).unwrap()).unwrap();
        }
        cache
            .put("https://cdn.example.com/clip-new.mp4", &words(), 10.0)
            .await
            .unwrap();

        // 5 entries, cap 4: the oldest two are gone.
        assert!(cache.get("https://cdn.example.com/clip-0.mp4").await.unwrap().is_none());
        assert!(cache.get("https://cdn.example.com/clip-1.mp4").await.unwrap().is_none());
        assert!(cache.get("https://cdn.example.com/clip-3.mp4").await.unwrap().is_some());
        assert!(cache.get("https://cdn.example.com/clip-new.mp4").await.unwrap().is_some());
    }
}

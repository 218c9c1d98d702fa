//! Built-in cache tiers: in-process memory and on-disk JSON files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheEntry;
use crate::error::AppError;
use crate::models::compute_hash;
use crate::traits::CacheTier;

/// Expires each moka entry after the TTL it was written with.
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Fast, volatile tier backed by a bounded moka cache.
pub struct MemoryTier {
    name: String,
    ttl: Duration,
    entries: Cache<String, CacheEntry>,
}

impl MemoryTier {
    pub fn new(name: impl Into<String>, ttl: Duration, max_entries: u64) -> Self {
        Self {
            name: name.into(),
            ttl,
            entries: Cache::builder()
                .max_capacity(max_entries)
                .expire_after(EntryExpiry)
                .build(),
        }
    }
}

#[async_trait]
impl CacheTier for MemoryTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        Ok(self.entries.get(key).await)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(key, value, ttl))
            .await;
        Ok(())
    }
}

/// On-disk representation of one [`CacheEntry`].
#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    value: String,
    stored_at: DateTime<Utc>,
    ttl_ms: u64,
}

/// Durable tier keeping one JSON file per key in a directory.
///
/// Writes go to a uniquely named temporary file which is then renamed over
/// the target, so readers never observe a half-written entry.
pub struct FileTier {
    name: String,
    dir: PathBuf,
    ttl: Duration,
}

impl FileTier {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", compute_hash(key)))
    }

    fn unavailable(&self, message: impl std::fmt::Display) -> AppError {
        AppError::CacheTierUnavailable {
            tier: self.name.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl CacheTier for FileTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        let raw = match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.unavailable(e)),
        };

        let stored: StoredEntry = serde_json::from_str(&raw)?;
        if stored.key != key {
            return Ok(None);
        }

        Ok(Some(CacheEntry {
            key: stored.key,
            value: stored.value,
            stored_at: stored.stored_at,
            ttl: Duration::from_millis(stored.ttl_ms),
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.unavailable(e))?;

        let stored = StoredEntry {
            key: key.to_string(),
            value: value.to_string(),
            stored_at: Utc::now(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        let body = serde_json::to_string(&stored)?;

        let target = self.path_for(key);
        let tmp = self
            .dir
            .join(format!("{}.{}.tmp", compute_hash(key), Uuid::new_v4()));
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| self.unavailable(e))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| self.unavailable(e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_tier_roundtrip() {
        let tier = MemoryTier::new("memory", Duration::from_secs(60), 100);
        assert!(tier.get("k").await.unwrap().is_none());

        tier.set("k", "[1]", Duration::from_secs(30)).await.unwrap();
        let entry = tier.get("k").await.unwrap().unwrap();
        assert_eq!(entry.value, "[1]");
        assert_eq!(entry.ttl, Duration::from_secs(30));
        assert_eq!(tier.ttl(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn memory_tier_evicts_after_entry_ttl() {
        let tier = MemoryTier::new("memory", Duration::from_secs(60), 100);
        tier.set("k", "[1]", Duration::from_millis(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(tier.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_tier_overwrite_keeps_newest_value() {
        let tier = MemoryTier::new("memory", Duration::from_secs(60), 100);
        tier.set("k", "[1]", Duration::from_secs(30)).await.unwrap();
        tier.set("k", "[2]", Duration::from_secs(30)).await.unwrap();
        assert_eq!(tier.get("k").await.unwrap().unwrap().value, "[2]");
    }

    #[tokio::test]
    async fn file_tier_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let tier = FileTier::new("disk", dir.path().join("cache"), Duration::from_secs(3600));

        assert!(tier.get("source:remoteok:abc").await.unwrap().is_none());

        tier.set("source:remoteok:abc", "[\"x\"]", Duration::from_secs(120))
            .await
            .unwrap();
        let entry = tier.get("source:remoteok:abc").await.unwrap().unwrap();
        assert_eq!(entry.key, "source:remoteok:abc");
        assert_eq!(entry.value, "[\"x\"]");
        assert_eq!(entry.ttl, Duration::from_secs(120));
        assert!(entry.stored_at <= Utc::now());
    }

    #[tokio::test]
    async fn file_tier_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let tier = FileTier::new("disk", dir.path(), Duration::from_secs(3600));
        tier.set("a", "[]", Duration::from_secs(1)).await.unwrap();
        tier.set("a", "[1]", Duration::from_secs(1)).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
        assert_eq!(tier.get("a").await.unwrap().unwrap().value, "[1]");
    }

    #[tokio::test]
    async fn file_tier_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let tier = FileTier::new("disk", dir.path(), Duration::from_secs(3600));
        std::fs::write(tier.path_for("k"), "not json").unwrap();

        let err = tier.get("k").await.unwrap_err();
        assert!(matches!(err, AppError::SerializationError(_)));
    }
}

//! Multi-tier cache with write-through promotion.
//!
//! Tiers are queried front-to-back (fast/volatile first, slow/durable
//! last). A hit at tier *i* is copied into tiers *0..i*; a full miss runs
//! the producer and stores its result in every tier with that tier's own
//! TTL. A tier that errors is skipped, never fatal.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::traits::CacheTier;

/// A stored value plus the metadata needed to judge its freshness.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    /// Serialized listing sequence (JSON text).
    pub value: String,
    pub stored_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            stored_at: Utc::now(),
            ttl,
        }
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        TimeDelta::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.stored_at.checked_add_signed(ttl))
    }

    /// True once `now > stored_at + ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires| now > expires)
    }

    /// Lifetime left at `now`; `None` when already expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.expires_at() {
            Some(expires) => (expires - now).to_std().ok(),
            None => Some(self.ttl),
        }
    }
}

/// A value returned by the cache, with the tier it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<T> {
    pub value: T,
    /// Index of the tier that served the value; `None` when the producer ran.
    pub tier: Option<usize>,
}

/// Ordered sequence of cache tiers.
#[derive(Clone, Default)]
pub struct TieredCache {
    tiers: Vec<Arc<dyn CacheTier>>,
}

impl TieredCache {
    pub fn new(tiers: Vec<Arc<dyn CacheTier>>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[Arc<dyn CacheTier>] {
        &self.tiers
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Look `key` up front-to-back, promoting a hit into the faster tiers.
    ///
    /// Expired entries, unreadable tiers and values that fail to decode are
    /// all treated as misses for that tier.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CacheLookup<T>> {
        let now = Utc::now();

        for (index, tier) in self.tiers.iter().enumerate() {
            let entry = match tier.get(key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    log_unavailable(tier.as_ref(), &e, "read");
                    continue;
                }
            };

            if entry.is_expired_at(now) {
                tracing::debug!(tier = %tier.name(), %key, "Cache entry expired");
                continue;
            }
            let remaining = entry.remaining_at(now).unwrap_or(Duration::ZERO);

            let value = match serde_json::from_str::<T>(&entry.value) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(tier = %tier.name(), %key, error = %e, "Undecodable cache entry ignored");
                    continue;
                }
            };

            tracing::debug!(tier = %tier.name(), %key, "Cache hit");
            self.backfill(key, &entry.value, index, remaining).await;
            return Some(CacheLookup {
                value,
                tier: Some(index),
            });
        }

        None
    }

    /// Copy a value found at tier `found_at` into every faster tier.
    ///
    /// The copy never outlives the entry it was promoted from.
    async fn backfill(&self, key: &str, raw: &str, found_at: usize, remaining: Duration) {
        for tier in &self.tiers[..found_at] {
            let ttl = tier.ttl().min(remaining);
            if let Err(e) = tier.set(key, raw, ttl).await {
                log_unavailable(tier.as_ref(), &e, "back-fill");
            }
        }
    }

    /// Store `value` in every tier, each with its own TTL.
    pub async fn store<T: Serialize>(&self, key: &str, value: &T) {
        self.write(key, value, None).await;
    }

    /// Store `value` in every tier with one explicit TTL.
    pub async fn store_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        self.write(key, value, Some(ttl)).await;
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(%key, error = %e, "Value not cacheable, skipping write");
                return;
            }
        };

        for tier in &self.tiers {
            if let Err(e) = tier.set(key, &raw, ttl.unwrap_or_else(|| tier.ttl())).await {
                log_unavailable(tier.as_ref(), &e, "write");
            }
        }
    }

    /// Return the cached value for `key`, or run `producer` and cache its result.
    pub async fn get_or_populate<T, F, Fut>(&self, key: &str, producer: F) -> CacheLookup<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let result = self
            .get_or_try_populate(key, move || async move { Ok::<T, Infallible>(producer().await) })
            .await;
        match result {
            Ok(lookup) => lookup,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or_populate`](Self::get_or_populate) for fallible producers.
    ///
    /// Only `Ok` values are cached; an `Err` is handed back untouched.
    pub async fn get_or_try_populate<T, E, F, Fut>(
        &self,
        key: &str,
        producer: F,
    ) -> Result<CacheLookup<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let value = producer().await?;
        self.store(key, &value).await;
        Ok(CacheLookup { value, tier: None })
    }
}

fn log_unavailable(tier: &dyn CacheTier, error: &AppError, operation: &str) {
    let unavailable = AppError::CacheTierUnavailable {
        tier: tier.name().to_string(),
        message: error.to_string(),
    };
    tracing::warn!(tier = %tier.name(), %operation, error = %unavailable, "Skipping cache tier");
}

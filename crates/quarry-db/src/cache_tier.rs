use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use quarry_core::cache::CacheEntry;
use quarry_core::error::AppError;
use quarry_core::traits::CacheTier;
use sqlx::PgPool;

/// Last instant PostgreSQL `timestamptz` comfortably represents.
const FAR_FUTURE_SECS: i64 = 253_402_300_799;

/// Durable cache tier stored in the `cache_entries` table.
///
/// Writes are upserts that never replace a row with an older `stored_at`,
/// so concurrent writers converge on the newest value.
#[derive(Clone)]
pub struct PgCacheTier {
    pool: PgPool,
    name: String,
    ttl: Duration,
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    key: String,
    value: String,
    stored_at: DateTime<Utc>,
    ttl_ms: i64,
}

impl From<CacheRow> for CacheEntry {
    fn from(row: CacheRow) -> Self {
        CacheEntry {
            key: row.key,
            value: row.value,
            stored_at: row.stored_at,
            ttl: Duration::from_millis(u64::try_from(row.ttl_ms).unwrap_or(0)),
        }
    }
}

impl PgCacheTier {
    pub fn new(pool: PgPool, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            pool,
            name: name.into(),
            ttl,
        }
    }

    fn unavailable(&self, e: sqlx::Error) -> AppError {
        AppError::CacheTierUnavailable {
            tier: self.name.clone(),
            message: e.to_string(),
        }
    }

    /// Upsert a fully specified entry, keeping whichever copy is newer.
    pub async fn put_entry(&self, entry: &CacheEntry) -> Result<(), AppError> {
        let ttl_ms = i64::try_from(entry.ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = TimeDelta::from_std(entry.ttl)
            .ok()
            .and_then(|ttl| entry.stored_at.checked_add_signed(ttl))
            .filter(|expires| expires.timestamp() <= FAR_FUTURE_SECS)
            .or_else(|| DateTime::<Utc>::from_timestamp(FAR_FUTURE_SECS, 0))
            .unwrap_or(entry.stored_at);

        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, value, stored_at, ttl_ms, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                stored_at = EXCLUDED.stored_at,
                ttl_ms = EXCLUDED.ttl_ms,
                expires_at = EXCLUDED.expires_at
            WHERE cache_entries.stored_at <= EXCLUDED.stored_at
            "#,
        )
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.stored_at)
        .bind(ttl_ms)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| self.unavailable(e))?;

        Ok(())
    }

    /// Delete every expired row. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
            .map_err(|e| self.unavailable(e))?;

        let purged = result.rows_affected();
        tracing::info!(tier = %self.name, %purged, "Purged expired cache entries");
        Ok(purged)
    }
}

#[async_trait]
impl CacheTier for PgCacheTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT key, value, stored_at, ttl_ms
            FROM cache_entries
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| self.unavailable(e))?;

        Ok(row.map(Into::into))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        self.put_entry(&CacheEntry::new(key, value, ttl)).await
    }
}

use std::time::Duration;

use quarry_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::cache_tier::PgCacheTier;
use crate::config::DatabaseConfig;

/// Owns the connection pool, runs migrations and vends cache tiers.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::debug!(max_connections = %config.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// A durable cache tier named `name` whose write-through TTL is `ttl`.
    pub fn cache_tier(&self, name: impl Into<String>, ttl: Duration) -> PgCacheTier {
        PgCacheTier::new(self.pool.clone(), name, ttl)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

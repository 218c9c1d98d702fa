use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::rate_limit::{RateLimit, RateLimiter};

/// Immutable settings for one aggregator instance.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Listings needed before fallback sources are skipped.
    pub min_viable: usize,
    /// Combined similarity at or above which two listings are duplicates.
    pub similarity_threshold: f64,
    /// Optional cap on cluster size; `None` keeps transitive clustering unbounded.
    pub max_cluster_size: Option<usize>,
    pub source_timeout: Duration,
    /// Source ids dispatched first, in priority order.
    pub primary_sources: Vec<String>,
    /// Source ids dispatched when primaries fall short, in priority order.
    pub fallback_sources: Vec<String>,
    pub default_rate_limit: RateLimit,
    pub rate_limits: HashMap<String, RateLimit>,
    pub memory_ttl: Duration,
    pub memory_capacity: u64,
    pub durable_ttl: Duration,
    /// Lifetime of last-known-good snapshots used for degraded answers.
    pub stale_ttl: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_viable: 5,
            similarity_threshold: 0.85,
            max_cluster_size: None,
            source_timeout: Duration::from_secs(30),
            primary_sources: Vec::new(),
            fallback_sources: Vec::new(),
            default_rate_limit: RateLimit::default(),
            rate_limits: HashMap::new(),
            memory_ttl: Duration::from_secs(15 * 60),
            memory_capacity: 1_000,
            durable_ttl: Duration::from_secs(24 * 60 * 60),
            stale_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl AggregatorConfig {
    /// Read configuration from environment variables.
    ///
    /// - `QUARRY_MIN_VIABLE` (default 5)
    /// - `QUARRY_SIMILARITY_THRESHOLD` (default 0.85, within 0.0..=1.0)
    /// - `QUARRY_MAX_CLUSTER_SIZE` (default unset)
    /// - `QUARRY_SOURCE_TIMEOUT_SECS` (default 30)
    /// - `QUARRY_PRIMARY_SOURCES`, `QUARRY_FALLBACK_SOURCES` (comma-separated ids)
    /// - `QUARRY_RATE_LIMITS` (`remoteok=5/60,greenhouse=10/30`)
    /// - `QUARRY_MEMORY_TTL_SECS` (default 900)
    /// - `QUARRY_DURABLE_TTL_SECS` (default 86400)
    /// - `QUARRY_STALE_TTL_SECS` (default 604800)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let min_viable = parse_var(&var, "QUARRY_MIN_VIABLE")?.unwrap_or(defaults.min_viable);
        if min_viable == 0 {
            return Err(AppError::ConfigError(
                "QUARRY_MIN_VIABLE must be at least 1".into(),
            ));
        }

        let similarity_threshold = parse_var(&var, "QUARRY_SIMILARITY_THRESHOLD")?
            .unwrap_or(defaults.similarity_threshold);
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(AppError::ConfigError(format!(
                "QUARRY_SIMILARITY_THRESHOLD must be within 0.0..=1.0, got {similarity_threshold}"
            )));
        }

        let max_cluster_size: Option<usize> = parse_var(&var, "QUARRY_MAX_CLUSTER_SIZE")?;
        if max_cluster_size == Some(0) {
            return Err(AppError::ConfigError(
                "QUARRY_MAX_CLUSTER_SIZE must be at least 1".into(),
            ));
        }

        let rate_limits = match var("QUARRY_RATE_LIMITS") {
            Some(raw) => parse_rate_limits(&raw)?,
            None => HashMap::new(),
        };

        Ok(Self {
            min_viable,
            similarity_threshold,
            max_cluster_size,
            source_timeout: secs_var(&var, "QUARRY_SOURCE_TIMEOUT_SECS")?
                .unwrap_or(defaults.source_timeout),
            primary_sources: var("QUARRY_PRIMARY_SOURCES")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            fallback_sources: var("QUARRY_FALLBACK_SOURCES")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            default_rate_limit: defaults.default_rate_limit,
            rate_limits,
            memory_ttl: secs_var(&var, "QUARRY_MEMORY_TTL_SECS")?.unwrap_or(defaults.memory_ttl),
            memory_capacity: defaults.memory_capacity,
            durable_ttl: secs_var(&var, "QUARRY_DURABLE_TTL_SECS")?
                .unwrap_or(defaults.durable_ttl),
            stale_ttl: secs_var(&var, "QUARRY_STALE_TTL_SECS")?.unwrap_or(defaults.stale_ttl),
        })
    }

    pub fn with_primary_sources<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_sources = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fallback_sources<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_sources = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_min_viable(mut self, min_viable: usize) -> Self {
        self.min_viable = min_viable;
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_max_cluster_size(mut self, max: usize) -> Self {
        self.max_cluster_size = Some(max);
        self
    }

    pub fn with_rate_limit(mut self, source_id: impl Into<String>, limit: RateLimit) -> Self {
        self.rate_limits.insert(source_id.into(), limit);
        self
    }

    /// Build a rate limiter with this configuration's limits.
    pub fn rate_limiter(&self) -> RateLimiter {
        self.rate_limits
            .iter()
            .fold(RateLimiter::new(self.default_rate_limit), |limiter, (id, limit)| {
                limiter.with_limit(id.clone(), *limit)
            })
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}'"))
        }),
    }
}

fn secs_var<F>(var: &F, key: &str) -> Result<Option<Duration>, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<u64, F>(var, key)? {
        Some(0) => Err(AppError::ConfigError(format!("{key} must be at least 1"))),
        other => Ok(other.map(Duration::from_secs)),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `id=requests/seconds` pairs separated by commas.
fn parse_rate_limits(raw: &str) -> Result<HashMap<String, RateLimit>, AppError> {
    split_list(raw)
        .into_iter()
        .map(|pair| {
            let (id, limit) = pair.split_once('=').ok_or_else(|| {
                AppError::ConfigError(format!(
                    "Invalid QUARRY_RATE_LIMITS entry '{pair}': expected id=requests/seconds"
                ))
            })?;
            let limit: RateLimit = limit.trim().parse().map_err(|e| {
                AppError::ConfigError(format!("Invalid QUARRY_RATE_LIMITS entry '{pair}': {e}"))
            })?;
            Ok((id.trim().to_string(), limit))
        })
        .collect()
}

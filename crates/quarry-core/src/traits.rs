use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::cache::CacheEntry;
use crate::error::{AppError, SourceFailure};
use crate::models::{RawListing, SearchCriteria};

/// Adapter over one external listing source.
///
/// Implementations must take a rate-limit permit before every
/// network-bound operation and must fail atomically: either a complete
/// fresh sequence is returned or a [`SourceFailure`], never a partial
/// result or a mutation of shared state.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stable identifier, used for rate limiting, caching and provenance.
    fn source_id(&self) -> &str;

    /// Cheap, synchronous check of whether this source applies to `criteria`.
    fn should_run(&self, _criteria: &SearchCriteria) -> bool {
        true
    }

    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<RawListing>, SourceFailure>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn source_id(&self) -> &str {
        (**self).source_id()
    }

    fn should_run(&self, criteria: &SearchCriteria) -> bool {
        (**self).should_run(criteria)
    }

    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<RawListing>, SourceFailure> {
        (**self).fetch(criteria).await
    }
}

/// One layer of the cache hierarchy.
///
/// Keys are opaque strings and values are serialized listing sequences.
/// Tiers only store and return entries; expiry is judged by the caller
/// from `stored_at` and `ttl`.
#[async_trait]
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &str;

    /// TTL applied to entries this tier receives through write-through.
    fn ttl(&self) -> Duration;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError>;
}

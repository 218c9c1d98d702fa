pub mod cache;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod registry;
pub mod reporter;
#[cfg(test)]
mod testutil;
pub mod tiers;
pub mod traits;
pub mod util;

pub use cache::{CacheEntry, CacheLookup, TieredCache};
pub use config::AggregatorConfig;
pub use coordinator::Aggregator;
pub use dedup::{Deduplicator, SimilarityScore};
pub use error::{AppError, SourceFailure};
pub use models::{
    Discovery, ExperienceLevel, Provenance, RawListing, SearchCriteria, UniqueListing,
    compute_hash,
};
pub use orchestrator::{Orchestrator, RawDiscovery};
pub use rate_limit::{RateLimit, RateLimited, RateLimiter};
pub use registry::ConnectorRegistry;
pub use reporter::{DiscoveryEvent, DiscoveryReporter, TracingReporter};
pub use tiers::{FileTier, MemoryTier};
pub use traits::{CacheTier, Connector};

use std::sync::Arc;

use crate::cache::TieredCache;
use crate::config::AggregatorConfig;
use crate::dedup::Deduplicator;
use crate::error::AppError;
use crate::models::{Discovery, SearchCriteria};
use crate::orchestrator::Orchestrator;
use crate::registry::ConnectorRegistry;
use crate::reporter::DiscoveryReporter;

/// Cache key of the deduplicated result for one criteria.
pub fn discovery_key(criteria: &SearchCriteria) -> String {
    format!("discovery:{}", criteria.fingerprint())
}

/// Top-level entry point: orchestrate sources, deduplicate, cache.
pub struct Aggregator {
    orchestrator: Orchestrator,
    deduplicator: Deduplicator,
    cache: TieredCache,
}

impl Aggregator {
    pub fn new(orchestrator: Orchestrator, deduplicator: Deduplicator, cache: TieredCache) -> Self {
        Self {
            orchestrator,
            deduplicator,
            cache,
        }
    }

    /// Wire an aggregator from configuration, a connector registry and cache tiers.
    pub fn from_config(
        config: &AggregatorConfig,
        registry: &ConnectorRegistry,
        cache: TieredCache,
        reporter: Arc<dyn DiscoveryReporter>,
    ) -> Result<Self, AppError> {
        let orchestrator =
            Orchestrator::from_config(config, registry, cache.clone())?.with_reporter(reporter);
        let mut deduplicator = Deduplicator::new(config.similarity_threshold);
        if let Some(max) = config.max_cluster_size {
            deduplicator = deduplicator.with_max_cluster_size(max);
        }
        Ok(Self::new(orchestrator, deduplicator, cache))
    }

    /// Discover unique listings for `criteria`. Never fails.
    ///
    /// Fresh results are cached under the criteria fingerprint. Degraded
    /// results are returned but not cached, so the next call tries the live
    /// sources again.
    pub async fn discover(&self, criteria: &SearchCriteria) -> Discovery {
        let key = discovery_key(criteria);

        let produce = async {
            let raw = self.orchestrator.discover_raw(criteria).await;
            let raw_count = raw.listings.len();
            let discovery = Discovery {
                listings: self.deduplicator.deduplicate(raw.listings),
                provenance: raw.provenance,
                raw_count,
                failures: raw.failures,
                cache_tier: None,
            };
            if discovery.is_fresh() {
                Ok(discovery)
            } else {
                Err(discovery)
            }
        };
        let result = self.cache.get_or_try_populate(&key, move || produce).await;

        match result {
            Ok(lookup) => {
                let mut discovery = lookup.value;
                discovery.cache_tier = lookup.tier;
                if let Some(tier) = lookup.tier {
                    tracing::debug!(%tier, listings = %discovery.listings.len(), "Discovery served from cache");
                }
                discovery
            }
            Err(degraded) => {
                tracing::warn!(
                    provenance = %degraded.provenance,
                    listings = %degraded.listings.len(),
                    failures = %degraded.failures.len(),
                    "Returning degraded discovery result"
                );
                degraded
            }
        }
    }
}

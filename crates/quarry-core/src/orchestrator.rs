//! Concurrent, failure-isolated dispatch of source connectors.
//!
//! A run moves through these phases:
//!
//! ```text
//! DISPATCH_PRIMARY -> EVALUATE -> [DISPATCH_FALLBACK -> EVALUATE]
//!                  -> [USE_CACHED_DEGRADED] -> DONE
//! ```
//!
//! Each connector runs in its own task behind a per-source cache lookup
//! and a timeout. Panics, errors and timeouts are turned into
//! [`SourceFailure`]s and never affect other connectors.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::Instant;

use crate::cache::{CacheLookup, TieredCache};
use crate::config::AggregatorConfig;
use crate::error::{AppError, SourceFailure};
use crate::models::{Provenance, RawListing, SearchCriteria};
use crate::registry::ConnectorRegistry;
use crate::reporter::{DiscoveryEvent, DiscoveryReporter, Phase, TracingReporter};
use crate::traits::Connector;

/// Raw (not yet deduplicated) outcome of one discovery run.
#[derive(Debug)]
pub struct RawDiscovery {
    pub listings: Vec<RawListing>,
    pub provenance: Provenance,
    pub failures: Vec<SourceFailure>,
    /// Connectors that answered, from the network or their cache.
    pub succeeded: usize,
}

/// Cache key of one source's answer to one criteria.
pub fn source_key(source_id: &str, criteria: &SearchCriteria) -> String {
    format!("source:{source_id}:{}", criteria.fingerprint())
}

/// Cache key of the last-known-good raw result for one criteria.
pub fn snapshot_key(criteria: &SearchCriteria) -> String {
    format!("snapshot:{}", criteria.fingerprint())
}

#[derive(Default)]
struct PhaseOutcome {
    listings: Vec<RawListing>,
    failures: Vec<SourceFailure>,
    succeeded: usize,
}

enum SourceOutcome {
    Cached { tier: usize, listings: Vec<RawListing> },
    Fetched { listings: Vec<RawListing>, elapsed: Duration },
}

/// Runs primary and fallback connectors and degrades to cached snapshots.
pub struct Orchestrator {
    primary: Vec<Arc<dyn Connector>>,
    fallback: Vec<Arc<dyn Connector>>,
    cache: TieredCache,
    reporter: Arc<dyn DiscoveryReporter>,
    min_viable: usize,
    source_timeout: Duration,
    stale_ttl: Duration,
}

impl Orchestrator {
    pub fn new(
        primary: Vec<Arc<dyn Connector>>,
        fallback: Vec<Arc<dyn Connector>>,
        cache: TieredCache,
    ) -> Self {
        let defaults = AggregatorConfig::default();
        Self {
            primary,
            fallback,
            cache,
            reporter: Arc::new(TracingReporter),
            min_viable: defaults.min_viable,
            source_timeout: defaults.source_timeout,
            stale_ttl: defaults.stale_ttl,
        }
    }

    /// Resolve the configured primary and fallback source ids against `registry`.
    pub fn from_config(
        config: &AggregatorConfig,
        registry: &ConnectorRegistry,
        cache: TieredCache,
    ) -> Result<Self, AppError> {
        let primary = registry.resolve(&config.primary_sources)?;
        let fallback = registry.resolve(&config.fallback_sources)?;
        if primary.is_empty() && fallback.is_empty() {
            return Err(AppError::ConfigError(
                "No primary or fallback sources configured".into(),
            ));
        }

        Ok(Self::new(primary, fallback, cache)
            .with_min_viable(config.min_viable)
            .with_source_timeout(config.source_timeout)
            .with_stale_ttl(config.stale_ttl))
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn DiscoveryReporter>) -> Self {
        self.reporter = reporter;
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

    pub fn with_stale_ttl(mut self, ttl: Duration) -> Self {
        self.stale_ttl = ttl;
        self
    }

    /// Collect raw listings for `criteria`. Never fails.
    pub async fn discover_raw(&self, criteria: &SearchCriteria) -> RawDiscovery {
        let criteria = Arc::new(criteria.clone());

        let primary = self.dispatch(Phase::Primary, &self.primary, &criteria).await;
        let mut listings = primary.listings;
        let mut failures = primary.failures;
        let mut succeeded = primary.succeeded;
        self.reporter.report(DiscoveryEvent::Evaluated {
            phase: Phase::Primary,
            collected: listings.len(),
            min_viable: self.min_viable,
        });

        if listings.len() < self.min_viable && !self.fallback.is_empty() {
            let fallback = self
                .dispatch(Phase::Fallback, &self.fallback, &criteria)
                .await;
            listings.extend(fallback.listings);
            failures.extend(fallback.failures);
            succeeded += fallback.succeeded;
            self.reporter.report(DiscoveryEvent::Evaluated {
                phase: Phase::Fallback,
                collected: listings.len(),
                min_viable: self.min_viable,
            });
        }

        let provenance = if listings.len() >= self.min_viable {
            Provenance::Fresh
        } else if !listings.is_empty() {
            Provenance::DegradedFallback
        } else if let Some(snapshot) = self.cached_snapshot(&criteria).await {
            listings = snapshot;
            Provenance::DegradedCached
        } else if succeeded > 0 {
            Provenance::Fresh
        } else {
            Provenance::NoDataAvailable
        };

        if !listings.is_empty() && provenance != Provenance::DegradedCached {
            self.cache
                .store_with_ttl(&snapshot_key(&criteria), &listings, self.stale_ttl)
                .await;
        }

        self.reporter.report(DiscoveryEvent::Completed {
            provenance,
            listings: listings.len(),
            failures: failures.len(),
        });

        RawDiscovery {
            listings,
            provenance,
            failures,
            succeeded,
        }
    }

    /// Run every applicable connector concurrently, merging in completion order.
    async fn dispatch(
        &self,
        phase: Phase,
        connectors: &[Arc<dyn Connector>],
        criteria: &Arc<SearchCriteria>,
    ) -> PhaseOutcome {
        let runnable: Vec<&Arc<dyn Connector>> = connectors
            .iter()
            .filter(|connector| {
                let applicable = connector.should_run(criteria);
                if !applicable {
                    self.reporter.report(DiscoveryEvent::SourceSkipped {
                        source_id: connector.source_id(),
                    });
                }
                applicable
            })
            .collect();

        let mut outcome = PhaseOutcome::default();
        if runnable.is_empty() {
            return outcome;
        }
        self.reporter.report(DiscoveryEvent::PhaseStarted {
            phase,
            sources: runnable.len(),
        });

        let mut pending = FuturesUnordered::new();
        for connector in runnable {
            let source_id = connector.source_id().to_string();
            let handle = tokio::spawn(run_source(
                Arc::clone(connector),
                Arc::clone(criteria),
                self.cache.clone(),
                self.source_timeout,
            ));
            pending.push(async move { (source_id, handle.await) });
        }

        while let Some((source_id, joined)) = pending.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    let detail = if e.is_panic() { "panicked" } else { "cancelled" };
                    Err(SourceFailure::aborted(&source_id, detail))
                }
            };

            match result {
                Ok(SourceOutcome::Cached { tier, listings }) => {
                    self.reporter.report(DiscoveryEvent::SourceCacheHit {
                        source_id: &source_id,
                        tier,
                        listings: listings.len(),
                    });
                    outcome.succeeded += 1;
                    outcome.listings.extend(listings);
                }
                Ok(SourceOutcome::Fetched { listings, elapsed }) => {
                    self.reporter.report(DiscoveryEvent::SourceSucceeded {
                        source_id: &source_id,
                        listings: listings.len(),
                        elapsed,
                    });
                    outcome.succeeded += 1;
                    outcome.listings.extend(listings);
                }
                Err(failure) => {
                    self.reporter
                        .report(DiscoveryEvent::SourceFailed { failure: &failure });
                    outcome.failures.push(failure);
                }
            }
        }

        outcome
    }

    /// Last-known-good listings for `criteria`, then for each broader scope.
    ///
    /// Snapshots of a broader scope are narrowed back down to what
    /// `criteria` admits; a scope with nothing left is skipped.
    async fn cached_snapshot(&self, criteria: &SearchCriteria) -> Option<Vec<RawListing>> {
        let scopes = std::iter::once(criteria.clone()).chain(criteria.broader_scopes());

        for (depth, scope) in scopes.enumerate() {
            let Some(hit) = self
                .cache
                .get::<Vec<RawListing>>(&snapshot_key(&scope))
                .await
            else {
                continue;
            };

            let listings: Vec<RawListing> = if depth == 0 {
                hit.value
            } else {
                hit.value
                    .into_iter()
                    .filter(|l| criteria.admits(&l.title, &l.location, &l.description))
                    .collect()
            };
            if listings.is_empty() {
                continue;
            }

            self.reporter.report(DiscoveryEvent::SnapshotServed {
                fingerprint: &scope.fingerprint(),
                broadened: depth > 0,
                listings: listings.len(),
            });
            return Some(listings);
        }
        None
    }
}

/// One connector invocation: cache first, then a bounded fetch.
async fn run_source(
    connector: Arc<dyn Connector>,
    criteria: Arc<SearchCriteria>,
    cache: TieredCache,
    timeout: Duration,
) -> Result<SourceOutcome, SourceFailure> {
    let source_id = connector.source_id().to_string();
    let key = source_key(&source_id, &criteria);
    let started = Instant::now();

    let fetch = async {
        match tokio::time::timeout(timeout, connector.fetch(&criteria)).await {
            Ok(result) => result,
            Err(_) => Err(SourceFailure::timed_out(&source_id, timeout)),
        }
    };
    let lookup: CacheLookup<Vec<RawListing>> =
        cache.get_or_try_populate(&key, move || fetch).await?;

    Ok(match lookup.tier {
        Some(tier) => SourceOutcome::Cached {
            tier,
            listings: lookup.value,
        },
        None => SourceOutcome::Fetched {
            listings: lookup.value,
            elapsed: started.elapsed(),
        },
    })
}

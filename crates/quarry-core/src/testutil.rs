//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` or atomics for interior mutability,
//! allowing test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::cache::CacheEntry;
use crate::error::{AppError, SourceFailure};
use crate::models::{RawListing, SearchCriteria};
use crate::reporter::{DiscoveryEvent, DiscoveryReporter};
use crate::traits::{CacheTier, Connector};

// ---------------------------------------------------------------------------
// MockConnector
// ---------------------------------------------------------------------------

enum Behavior {
    Listings(Vec<RawListing>),
    Error(fn() -> AppError),
    Panic,
}

/// Mock connector returning a fixed listing set (or a fixed failure).
pub struct MockConnector {
    source_id: String,
    behavior: Behavior,
    delay: Option<Duration>,
    applicable: bool,
    calls: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(source_id: &str, listings: Vec<RawListing>) -> Self {
        Self::with_behavior(source_id, Behavior::Listings(listings))
    }

    /// A connector whose every fetch fails with the error built by `error`.
    pub fn with_error(source_id: &str, error: fn() -> AppError) -> Self {
        Self::with_behavior(source_id, Behavior::Error(error))
    }

    /// A connector whose fetch panics.
    pub fn panicking(source_id: &str) -> Self {
        Self::with_behavior(source_id, Behavior::Panic)
    }

    fn with_behavior(source_id: &str, behavior: Behavior) -> Self {
        Self {
            source_id: source_id.to_string(),
            behavior,
            delay: None,
            applicable: true,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `should_run` return false for every criteria.
    pub fn never_applicable(mut self) -> Self {
        self.applicable = false;
        self
    }

    /// Shared counter of `fetch` invocations.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn should_run(&self, _criteria: &SearchCriteria) -> bool {
        self.applicable
    }

    async fn fetch(&self, _criteria: &SearchCriteria) -> Result<Vec<RawListing>, SourceFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            Behavior::Listings(listings) => Ok(listings.clone()),
            Behavior::Error(error) => Err(SourceFailure::new(&self.source_id, error())),
            Behavior::Panic => panic!("mock connector '{}' panicked", self.source_id),
        }
    }
}

// ---------------------------------------------------------------------------
// MapTier
// ---------------------------------------------------------------------------

/// In-memory cache tier that keeps every entry, expired or not.
///
/// Unlike [`MemoryTier`](crate::tiers::MemoryTier) it never evicts, so
/// tests can plant entries with arbitrary `stored_at` values.
#[derive(Clone)]
pub struct MapTier {
    name: String,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl MapTier {
    pub fn new(name: &str, ttl: Duration) -> Self {
        Self {
            name: name.to_string(),
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn insert_entry(&self, entry: CacheEntry) {
        self.entries.lock().unwrap().insert(entry.key.clone(), entry);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheTier for MapTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, AppError> {
        Ok(self.entry(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        self.insert_entry(CacheEntry::new(key, value, ttl));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FailingTier
// ---------------------------------------------------------------------------

/// Cache tier whose every read and write fails.
pub struct FailingTier {
    name: String,
}

impl FailingTier {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl CacheTier for FailingTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, AppError> {
        Err(AppError::NetworkError("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), AppError> {
        Err(AppError::NetworkError("connection refused".into()))
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock discovery reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == label).count()
    }
}

impl DiscoveryReporter for MockReporter {
    fn report(&self, event: DiscoveryEvent<'_>) {
        let label = match &event {
            DiscoveryEvent::PhaseStarted { .. } => "PhaseStarted",
            DiscoveryEvent::SourceSkipped { .. } => "SourceSkipped",
            DiscoveryEvent::SourceCacheHit { .. } => "SourceCacheHit",
            DiscoveryEvent::SourceSucceeded { .. } => "SourceSucceeded",
            DiscoveryEvent::SourceFailed { .. } => "SourceFailed",
            DiscoveryEvent::Evaluated { .. } => "Evaluated",
            DiscoveryEvent::SnapshotServed { .. } => "SnapshotServed",
            DiscoveryEvent::Completed { .. } => "Completed",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a RawListing with the given identity fields.
pub fn make_listing(source_id: &str, title: &str, company: &str, description: &str) -> RawListing {
    RawListing {
        source_id: source_id.to_string(),
        title: title.to_string(),
        company: company.to_string(),
        description: description.to_string(),
        location: "Remote".to_string(),
        posted_at: None,
        url: format!(
            "https://{source_id}.example.com/{}",
            title.to_lowercase().replace(' ', "-")
        ),
        fetched_at: Utc::now(),
    }
}

/// Create `count` mutually distinct listings from one source.
pub fn make_distinct_listings(source_id: &str, count: usize) -> Vec<RawListing> {
    const ROLES: &[&str] = &[
        "Product Manager",
        "Backend Engineer",
        "Data Scientist",
        "Designer",
        "Support Specialist",
        "Security Analyst",
        "Recruiter",
        "Technical Writer",
        "Account Executive",
        "Site Reliability Engineer",
    ];
    (0..count)
        .map(|i| {
            let role = ROLES[i % ROLES.len()];
            make_listing(
                source_id,
                &format!("{role} {i}"),
                &format!("{source_id} company {i}"),
                &format!("{role} opening number {i} posted on {source_id}"),
            )
        })
        .collect()
}

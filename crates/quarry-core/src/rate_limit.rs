//! Per-source request rate limiting.
//!
//! Every source gets a fixed window of `max_requests` permits per
//! `interval`. Callers that find the window exhausted are suspended until
//! it reopens. Waiters on the same source are served strictly in request
//! order; different sources never block each other.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use quarry_core::rate_limit::{RateLimit, RateLimiter};
//!
//! # async fn run() {
//! let limiter = Arc::new(
//!     RateLimiter::new(RateLimit::default())
//!         .with_limit("greenhouse", RateLimit::new(10, Duration::from_secs(60))),
//! );
//! let permit = limiter.acquire("greenhouse").await;
//! assert_eq!(permit.source_id, "greenhouse");
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{AppError, SourceFailure};
use crate::models::{RawListing, SearchCriteria};
use crate::traits::Connector;

/// Requests allowed per fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub interval: Duration,
}

impl RateLimit {
    /// A limit of `max_requests` per `interval` (at least one request).
    pub fn new(max_requests: u32, interval: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            interval,
        }
    }
}

impl Default for RateLimit {
    /// 5 requests per minute.
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.interval.as_secs())
    }
}

impl FromStr for RateLimit {
    type Err = String;

    /// Parses `"<requests>/<seconds>"`, e.g. `"5/60"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (requests, secs) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("Invalid rate limit '{s}': expected <requests>/<seconds>"))?;
        let requests: u32 = requests
            .trim()
            .parse()
            .map_err(|_| format!("Invalid request count in rate limit '{s}'"))?;
        let secs: u64 = secs
            .trim()
            .parse()
            .map_err(|_| format!("Invalid interval in rate limit '{s}'"))?;
        if requests == 0 || secs == 0 {
            return Err(format!("Rate limit '{s}' must be positive"));
        }
        Ok(Self::new(requests, Duration::from_secs(secs)))
    }
}

/// Proof that a request to `source_id` may proceed.
#[derive(Debug, Clone)]
pub struct RatePermit {
    pub source_id: String,
    pub granted_at: Instant,
    /// Time spent suspended before the permit was granted.
    pub waited: Duration,
}

#[derive(Debug, Default)]
struct Window {
    started: Option<Instant>,
    granted: u32,
}

/// Fixed-window, FIFO rate limiter keyed by source id.
pub struct RateLimiter {
    default_limit: RateLimit,
    limits: HashMap<String, RateLimit>,
    /// One fair async mutex per source; holding it is the right to be next.
    windows: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Window>>>>,
}

impl RateLimiter {
    /// Create a limiter applying `default_limit` to every source.
    pub fn new(default_limit: RateLimit) -> Self {
        Self {
            default_limit,
            limits: HashMap::new(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Override the limit for one source.
    pub fn with_limit(mut self, source_id: impl Into<String>, limit: RateLimit) -> Self {
        self.limits.insert(source_id.into(), limit);
        self
    }

    pub fn limit_for(&self, source_id: &str) -> RateLimit {
        self.limits
            .get(source_id)
            .copied()
            .unwrap_or(self.default_limit)
    }

    fn window(&self, source_id: &str) -> Arc<tokio::sync::Mutex<Window>> {
        let mut windows = self.windows.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rate limiter mutex");
            poisoned.into_inner()
        });
        Arc::clone(windows.entry(source_id.to_string()).or_default())
    }

    /// Wait until `source_id` has budget in its current window.
    ///
    /// Never fails. Callers that need an upper bound should use
    /// [`acquire_timeout`](Self::acquire_timeout).
    pub async fn acquire(&self, source_id: &str) -> RatePermit {
        let requested = Instant::now();
        let limit = self.limit_for(source_id);
        let window = self.window(source_id);

        // tokio's Mutex grants the lock in FIFO order, which is what keeps
        // waiters on the same source from starving each other.
        let mut window = window.lock().await;
        let now = Instant::now();

        match window.started {
            Some(started) if now.duration_since(started) < limit.interval => {
                if window.granted >= limit.max_requests {
                    let reopens = started + limit.interval;
                    tracing::debug!(
                        source_id = %source_id,
                        sleep_ms = %reopens.duration_since(now).as_millis(),
                        "Rate limit window exhausted, waiting"
                    );
                    tokio::time::sleep_until(reopens).await;
                    window.started = Some(reopens);
                    window.granted = 0;
                }
            }
            _ => {
                window.started = Some(now);
                window.granted = 0;
            }
        }

        window.granted += 1;
        RatePermit {
            source_id: source_id.to_string(),
            granted_at: Instant::now(),
            waited: requested.elapsed(),
        }
    }

    /// Like [`acquire`](Self::acquire), giving up after `max_wait`.
    pub async fn acquire_timeout(
        &self,
        source_id: &str,
        max_wait: Duration,
    ) -> Result<RatePermit, AppError> {
        tokio::time::timeout(max_wait, self.acquire(source_id))
            .await
            .map_err(|_| AppError::RateLimitTimeout {
                source_id: source_id.to_string(),
                waited: max_wait,
            })
    }
}

/// A [`Connector`] wrapper that takes one rate-limit permit per fetch.
///
/// Suitable for connectors that make a single network call per fetch;
/// connectors issuing several calls should hold the limiter themselves and
/// acquire before each one.
pub struct RateLimited<C> {
    inner: C,
    limiter: Arc<RateLimiter>,
    max_wait: Option<Duration>,
}

impl<C: Connector> RateLimited<C> {
    pub fn new(inner: C, limiter: Arc<RateLimiter>) -> Self {
        Self {
            inner,
            limiter,
            max_wait: None,
        }
    }

    /// Fail the fetch with `RateLimitTimeout` instead of waiting longer than `max_wait`.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

#[async_trait]
impl<C: Connector> Connector for RateLimited<C> {
    fn source_id(&self) -> &str {
        self.inner.source_id()
    }

    fn should_run(&self, criteria: &SearchCriteria) -> bool {
        self.inner.should_run(criteria)
    }

    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<RawListing>, SourceFailure> {
        let source_id = self.inner.source_id();
        match self.max_wait {
            Some(max_wait) => {
                self.limiter
                    .acquire_timeout(source_id, max_wait)
                    .await
                    .map_err(|e| SourceFailure::new(source_id, e))?;
            }
            None => {
                self.limiter.acquire(source_id).await;
            }
        }
        self.inner.fetch(criteria).await
    }
}

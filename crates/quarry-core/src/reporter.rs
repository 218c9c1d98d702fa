use std::fmt;
use std::time::Duration;

use crate::error::SourceFailure;
use crate::models::Provenance;

/// Dispatch phase of a discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Primary,
    Fallback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Primary => write!(f, "primary"),
            Phase::Fallback => write!(f, "fallback"),
        }
    }
}

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent<'a> {
    PhaseStarted {
        phase: Phase,
        sources: usize,
    },
    SourceSkipped {
        source_id: &'a str,
    },
    SourceCacheHit {
        source_id: &'a str,
        tier: usize,
        listings: usize,
    },
    SourceSucceeded {
        source_id: &'a str,
        listings: usize,
        elapsed: Duration,
    },
    SourceFailed {
        failure: &'a SourceFailure,
    },
    Evaluated {
        phase: Phase,
        collected: usize,
        min_viable: usize,
    },
    SnapshotServed {
        fingerprint: &'a str,
        broadened: bool,
        listings: usize,
    },
    Completed {
        provenance: Provenance,
        listings: usize,
        failures: usize,
    },
}

/// Trait for receiving discovery events (decoupled logging).
pub trait DiscoveryReporter: Send + Sync {
    fn report(&self, event: DiscoveryEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl DiscoveryReporter for TracingReporter {
    fn report(&self, event: DiscoveryEvent<'_>) {
        match event {
            DiscoveryEvent::PhaseStarted { phase, sources } => {
                tracing::info!(%phase, %sources, "Dispatching sources");
            }
            DiscoveryEvent::SourceSkipped { source_id } => {
                tracing::debug!(%source_id, "Source not applicable to criteria, skipped");
            }
            DiscoveryEvent::SourceCacheHit {
                source_id,
                tier,
                listings,
            } => {
                tracing::debug!(%source_id, %tier, %listings, "Source served from cache");
            }
            DiscoveryEvent::SourceSucceeded {
                source_id,
                listings,
                elapsed,
            } => {
                tracing::info!(
                    %source_id,
                    %listings,
                    elapsed_ms = %elapsed.as_millis(),
                    "Source fetched"
                );
            }
            DiscoveryEvent::SourceFailed { failure } => {
                tracing::warn!(
                    source_id = %failure.source_id,
                    error = %failure.cause,
                    retryable = %failure.cause.is_retryable(),
                    "Source failed"
                );
            }
            DiscoveryEvent::Evaluated {
                phase,
                collected,
                min_viable,
            } => {
                tracing::info!(%phase, %collected, %min_viable, "Evaluated collected listings");
            }
            DiscoveryEvent::SnapshotServed {
                fingerprint,
                broadened,
                listings,
            } => {
                tracing::warn!(%fingerprint, %broadened, %listings, "Serving stale snapshot");
            }
            DiscoveryEvent::Completed {
                provenance,
                listings,
                failures,
            } => {
                tracing::info!(%provenance, %listings, %failures, "Discovery completed");
            }
        }
    }
}

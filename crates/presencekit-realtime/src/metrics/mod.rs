//! Presence engine metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Engine-level counters for one presence session.
#[derive(Debug, Default)]
pub struct PresenceMetrics {
    /// `Disconnected → Connected` transitions that completed registration
    pub connects_processed: AtomicU64,
    /// `Connected → Disconnected` transitions handled
    pub disconnects_processed: AtomicU64,
    /// Connect transitions abandoned during the settle window
    pub connects_abandoned: AtomicU64,
    /// Heartbeats written
    pub heartbeats_sent: AtomicU64,
    /// Heartbeat ticks skipped (disconnected, backgrounded, or busy)
    pub heartbeats_skipped: AtomicU64,
    /// Heartbeat writes that failed or timed out
    pub heartbeats_failed: AtomicU64,
    /// Mutations dropped because another was in flight
    pub mutations_dropped: AtomicU64,
    /// Reads answered by the durable fallback
    pub durable_fallbacks: AtomicU64,
    /// Errors received on live presence feeds
    pub stream_errors: AtomicU64,
}

impl PresenceMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connects_processed: self.connects_processed.load(Ordering::Relaxed),
            disconnects_processed: self.disconnects_processed.load(Ordering::Relaxed),
            connects_abandoned: self.connects_abandoned.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            heartbeats_skipped: self.heartbeats_skipped.load(Ordering::Relaxed),
            heartbeats_failed: self.heartbeats_failed.load(Ordering::Relaxed),
            mutations_dropped: self.mutations_dropped.load(Ordering::Relaxed),
            durable_fallbacks: self.durable_fallbacks.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
        }
    }
}

/// Serializable metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Connect transitions processed
    pub connects_processed: u64,
    /// Disconnect transitions processed
    pub disconnects_processed: u64,
    /// Connect transitions abandoned
    pub connects_abandoned: u64,
    /// Heartbeats written
    pub heartbeats_sent: u64,
    /// Heartbeat ticks skipped
    pub heartbeats_skipped: u64,
    /// Heartbeat writes failed
    pub heartbeats_failed: u64,
    /// Mutations dropped by the operation guard
    pub mutations_dropped: u64,
    /// Reads served by the durable store
    pub durable_fallbacks: u64,
    /// Live feed errors
    pub stream_errors: u64,
}

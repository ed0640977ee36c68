//! Periodic liveness pulse for the signed-in user.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use presencekit_core::types::{PresencePatch, Stamp};

use crate::context::{PresenceContext, bounded};
use crate::metrics::PresenceMetrics;

use super::monitor::{ConnectionState, ConnectionStateMonitor};

/// Writes `heartbeat` and `last_seen` on a fixed period.
///
/// A tick that finds the monitor disconnected, the app backgrounded, or a
/// presence mutation in flight is skipped, never queued. A failed write is
/// logged and leaves the connection state alone.
#[derive(Debug)]
pub struct HeartbeatScheduler {
    ctx: Arc<PresenceContext>,
    monitor: Arc<ConnectionStateMonitor>,
    foreground: Arc<AtomicBool>,
    beats: AtomicU64,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatScheduler {
    /// Create a stopped scheduler. `foreground` is shared with the lifecycle
    /// handling of the owning service.
    pub fn new(
        ctx: Arc<PresenceContext>,
        monitor: Arc<ConnectionStateMonitor>,
        foreground: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            monitor,
            foreground,
            beats: AtomicU64::new(0),
            cancel,
            handle: Mutex::new(None),
        }
    }

    /// Start ticking. The first tick fires one period from now.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let period = self.ctx.config.heartbeat_interval();
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        *handle = Some(tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        this.tick().await;
                    }
                }
            }
            debug!(user = %this.ctx.user, "Heartbeat loop ended");
        }));
        debug!(user = %self.ctx.user, ?period, "Heartbeat started");
    }

    /// Stop ticking.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    /// Record whether the app is in the foreground.
    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::SeqCst);
    }

    /// Successful heartbeats written.
    pub fn beat_count(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }

    /// Run one heartbeat. Returns whether a heartbeat was written.
    ///
    /// The operation guard is held for the whole write, so a presence
    /// mutation arriving meanwhile is dropped rather than interleaved.
    pub async fn tick(&self) -> bool {
        let ctx = &self.ctx;
        let permit = if self.monitor.state() == ConnectionState::Connected
            && self.foreground.load(Ordering::SeqCst)
        {
            ctx.guard.try_acquire("heartbeat")
        } else {
            None
        };
        let Some(_permit) = permit else {
            PresenceMetrics::inc(&ctx.metrics.heartbeats_skipped);
            trace!(user = %ctx.user, "Heartbeat skipped");
            return false;
        };

        let patch = PresencePatch::new()
            .heartbeat(Stamp::Server)
            .last_seen(Stamp::Server);
        let write = ctx.ephemeral().update_record(&ctx.user, patch);
        match bounded(ctx.config.heartbeat_timeout(), "heartbeat", write).await {
            Ok(()) => {
                self.beats.fetch_add(1, Ordering::SeqCst);
                PresenceMetrics::inc(&ctx.metrics.heartbeats_sent);
                trace!(user = %ctx.user, "Heartbeat written");
                true
            }
            Err(e) => {
                PresenceMetrics::inc(&ctx.metrics.heartbeats_failed);
                warn!(user = %ctx.user, error = %e, "Heartbeat write failed");
                false
            }
        }
    }
}

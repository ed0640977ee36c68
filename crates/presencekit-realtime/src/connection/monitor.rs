//! Connection-state machine driven by the ephemeral store's transport signal.
//!
//! `Disconnected → Connected` registers a fresh connection session with
//! server-side cleanup directives once the transport has settled.
//! `Connected → Disconnected` performs no ephemeral writes: the store runs the
//! directives on its own. Both transitions mirror the flag to the durable
//! store in the background.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use presencekit_core::error::AppError;
use presencekit_core::result::AppResult;
use presencekit_core::types::{
    CleanupAction, ConnectionId, ConnectionSession, PresencePatch, PresencePath, PresenceSource,
    ProfilePatch, Stamp,
};

use crate::context::{PresenceContext, bounded};
use crate::metrics::PresenceMetrics;

use super::retry::RetryCoordinator;

/// Connection state as seen by the presence engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No registered connection session.
    Disconnected,
    /// A connection session is registered and the record is online.
    Connected,
}

/// Drives connect/disconnect transitions for one user.
#[derive(Debug)]
pub struct ConnectionStateMonitor {
    ctx: Arc<PresenceContext>,
    retry: Arc<RetryCoordinator>,
    state: watch::Sender<ConnectionState>,
    /// Last transport value received; duplicate events are dropped.
    transport_up: AtomicBool,
    /// Bumped on every transport change; a settle timer from an older epoch
    /// is abandoned.
    epoch: AtomicU64,
    active: Mutex<Option<ConnectionId>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionStateMonitor {
    /// Create a stopped monitor in the `Disconnected` state.
    pub fn new(
        ctx: Arc<PresenceContext>,
        retry: Arc<RetryCoordinator>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            ctx,
            retry,
            state,
            transport_up: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            active: Mutex::new(None),
            cancel,
            tasks: Mutex::new(Vec::new()),
            reconnect: Mutex::new(None),
        }
    }

    /// Subscribe to the transport signal and start processing transitions.
    pub fn start(self: &Arc<Self>) {
        let mut signal = self.ctx.ephemeral().watch_connected();
        let this = Arc::clone(self);
        self.spawn(async move {
            while let Some(up) = signal.next().await {
                this.handle_transport(up).await;
            }
            debug!(user = %this.ctx.user, "Transport signal ended");
        });
        info!(user = %self.ctx.user, "Connection monitor started");
    }

    /// Feed one transport value into the state machine.
    pub async fn handle_transport(self: &Arc<Self>, up: bool) {
        if self.transport_up.swap(up, Ordering::SeqCst) == up {
            trace!(user = %self.ctx.user, up, "Duplicate transport event ignored");
            return;
        }
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(user = %self.ctx.user, up, epoch, "Transport changed");

        if up {
            self.settle(epoch);
        } else {
            self.on_disconnected().await;
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Identifier of the registered connection session.
    pub fn active_connection_id(&self) -> Option<ConnectionId> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Take the registered connection id, leaving none.
    pub fn take_active_connection(&self) -> Option<ConnectionId> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// `Disconnected → Connected` transitions that completed registration.
    pub fn connects_processed(&self) -> u64 {
        self.ctx.metrics.connects_processed.load(Ordering::Relaxed)
    }

    /// `Connected → Disconnected` transitions processed.
    pub fn disconnects_processed(&self) -> u64 {
        self.ctx.metrics.disconnects_processed.load(Ordering::Relaxed)
    }

    /// Register a connection unless one already is, retrying with the
    /// connection cooldown loop.
    ///
    /// Returns whether a connection is registered when the call finishes.
    pub async fn ensure_registered(self: &Arc<Self>) -> AppResult<bool> {
        self.register_with_retry(None).await
    }

    /// After the disconnect retry delay, re-read the transport state and
    /// register again if it is back up. At most one reconnect loop runs.
    pub fn schedule_reconnect(self: &Arc<Self>) {
        let mut reconnect = self.reconnect.lock().unwrap_or_else(|e| e.into_inner());
        if reconnect.as_ref().is_some_and(|handle| !handle.is_finished()) {
            trace!(user = %self.ctx.user, "Reconnect already scheduled");
            return;
        }

        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        let delay = self.ctx.config.disconnect_retry_delay();
        *reconnect = Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if this.state() == ConnectionState::Connected {
                return;
            }
            debug!(user = %this.ctx.user, "Still disconnected, retrying connection");
            if let Err(e) = this.register_with_retry(None).await {
                debug!(user = %this.ctx.user, error = %e, "Reconnect loop ended");
            }
        }));
    }

    /// Cancel timers and subscriptions and return to `Disconnected`.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.retry.cancel();
        for handle in self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            handle.abort();
        }
        if let Some(handle) = self
            .reconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        self.active.lock().unwrap_or_else(|e| e.into_inner()).take();
        self.state.send_replace(ConnectionState::Disconnected);
        info!(user = %self.ctx.user, "Connection monitor stopped");
    }

    fn is_registered(&self) -> bool {
        self.state() == ConnectionState::Connected && self.active_connection_id().is_some()
    }

    fn settle(self: &Arc<Self>, epoch: u64) {
        let this = Arc::clone(self);
        let delay = self.ctx.config.settle_delay();
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            if this.epoch.load(Ordering::SeqCst) != epoch {
                PresenceMetrics::inc(&this.ctx.metrics.connects_abandoned);
                debug!(user = %this.ctx.user, epoch, "Transport changed while settling, connect abandoned");
                return;
            }
            match this.register_with_retry(Some(epoch)).await {
                Ok(true) => {}
                Ok(false) => {
                    PresenceMetrics::inc(&this.ctx.metrics.connects_abandoned);
                    debug!(user = %this.ctx.user, epoch, "Connect abandoned");
                }
                Err(e) => debug!(user = %this.ctx.user, error = %e, "Connect retries stopped"),
            }
        });
    }

    async fn register_with_retry(self: &Arc<Self>, epoch: Option<u64>) -> AppResult<bool> {
        let id = ConnectionId::generate();
        self.retry
            .attempt_connection("register_connection", |attempt| {
                let this = Arc::clone(self);
                let id = id.clone();
                async move {
                    trace!(user = %this.ctx.user, attempt, "Registering connection");
                    this.register_connection(id, epoch).await
                }
            })
            .await
    }

    /// Steps of the connect transition, run under the operation guard.
    ///
    /// With an epoch, a transport change since that epoch abandons the
    /// transition. Without one, a down transport is an error so the
    /// reconnect loop keeps trying.
    async fn register_connection(&self, id: ConnectionId, epoch: Option<u64>) -> AppResult<bool> {
        let transport_up = self.transport_up.load(Ordering::SeqCst);
        match epoch {
            Some(epoch) if self.epoch.load(Ordering::SeqCst) != epoch || !transport_up => {
                return Ok(false);
            }
            None if !transport_up => {
                return Err(AppError::service_unavailable("Transport is down"));
            }
            _ => {}
        }
        if self.is_registered() {
            return Ok(true);
        }

        let ctx = &self.ctx;
        let Some(_permit) = ctx.guard.try_acquire("register_connection") else {
            PresenceMetrics::inc(&ctx.metrics.mutations_dropped);
            debug!(user = %ctx.user, "Presence mutation in flight, connect deferred");
            return Err(AppError::conflict("Presence mutation in flight"));
        };
        if self.is_registered() {
            return Ok(true);
        }

        let store = ctx.ephemeral();
        let user = &ctx.user;
        let timeout = ctx.config.write_timeout();
        let session = ConnectionSession {
            connection_id: id.clone(),
            connected: true,
            last_seen: ctx.clock.now(),
            device_info: ctx.config.device_info.clone(),
        };

        bounded(timeout, "put_session", store.put_session(user, session)).await?;
        bounded(
            timeout,
            "attach_session_cleanup",
            store.attach_disconnect_cleanup(
                PresencePath::Session(user.clone(), id.clone()),
                CleanupAction::RemoveSession,
            ),
        )
        .await?;
        bounded(
            timeout,
            "update_record",
            store.update_record(
                user,
                PresencePatch::new()
                    .online(true)
                    .last_seen(Stamp::Server)
                    .active_connection(Some(id.clone())),
            ),
        )
        .await?;
        bounded(
            timeout,
            "attach_record_cleanup",
            store.attach_disconnect_cleanup(
                PresencePath::Record(user.clone()),
                CleanupAction::MarkOffline,
            ),
        )
        .await?;

        if !self.transport_up.load(Ordering::SeqCst) {
            debug!(user = %user, connection_id = %id, "Transport dropped during registration");
            return Ok(false);
        }

        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(id.clone());
        self.state.send_replace(ConnectionState::Connected);
        PresenceMetrics::inc(&ctx.metrics.connects_processed);
        ctx.cache.invalidate(user).await;
        info!(user = %user, connection_id = %id, "Connection registered");

        self.mirror(true);
        self.retry.reset();
        Ok(true)
    }

    async fn on_disconnected(self: &Arc<Self>) {
        if self.state() != ConnectionState::Connected {
            debug!(user = %self.ctx.user, "Transport dropped before registration");
            return;
        }
        self.state.send_replace(ConnectionState::Disconnected);
        let previous = self.take_active_connection();
        PresenceMetrics::inc(&self.ctx.metrics.disconnects_processed);
        self.ctx.cache.invalidate(&self.ctx.user).await;
        info!(
            user = %self.ctx.user,
            connection_id = ?previous,
            "Connection lost, store cleanup takes over"
        );

        self.mirror(false);
        self.schedule_reconnect();
    }

    /// Mirror the online flag to the durable store in the background. A
    /// mirror whose state has been superseded is skipped.
    fn mirror(&self, online: bool) {
        let ctx = Arc::clone(&self.ctx);
        let retry = Arc::clone(&self.retry);
        let state = self.state.subscribe();
        let expected = if online {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };

        self.spawn(async move {
            let result = retry
                .retry("mirror_presence", |_| {
                    let ctx = Arc::clone(&ctx);
                    let current = *state.borrow();
                    async move {
                        if current != expected {
                            trace!(user = %ctx.user, online, "Superseded mirror skipped");
                            return Ok(());
                        }
                        bounded(
                            ctx.config.write_timeout(),
                            "update_profile",
                            ctx.durable().update_profile(
                                &ctx.user_id,
                                ProfilePatch::presence(online, PresenceSource::Realtime),
                            ),
                        )
                        .await
                    }
                })
                .await;
            if let Err(e) = result {
                warn!(user = %ctx.user, online, error = %e, "Durable presence mirror failed");
            }
        });
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = fut => {}
            }
        });
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

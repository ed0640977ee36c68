//! Presence façade that ties together all subsystems for one signed-in user.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use presencekit_core::clock::SharedClock;
use presencekit_core::config::PresenceConfig;
use presencekit_core::error::AppError;
use presencekit_core::result::AppResult;
use presencekit_core::types::{
    PresencePatch, PresencePath, PresenceRecord, PresenceSource, ProfileMirror, ProfilePatch,
    Stamp, UserInfo, UserKey,
};

use crate::connection::heartbeat::HeartbeatScheduler;
use crate::connection::monitor::{ConnectionState, ConnectionStateMonitor};
use crate::connection::retry::RetryCoordinator;
use crate::context::{PresenceContext, PresenceStores, bounded};
use crate::metrics::{MetricsSnapshot, PresenceMetrics};
use crate::presence::lifecycle::{AppLifecycle, LifecycleObserver};
use crate::presence::status::PresenceStatus;

/// Live feed of a user's presence record.
pub type PresenceStream = Pin<Box<dyn Stream<Item = Option<PresenceRecord>> + Send>>;

/// Whether the service has been initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Constructed or torn down.
    Uninitialized,
    /// Monitor and heartbeat running.
    Initialized,
}

/// Timers, subscriptions, and retries belonging to one initialization.
#[derive(Debug)]
struct Session {
    /// Root token; every task spawned for this session listens to it.
    cancel: CancellationToken,
    retry: Arc<RetryCoordinator>,
    runtime: Option<Runtime>,
}

#[derive(Debug)]
struct Runtime {
    monitor: Arc<ConnectionStateMonitor>,
    heartbeat: Arc<HeartbeatScheduler>,
}

impl Session {
    fn fresh(config: &PresenceConfig) -> Self {
        let cancel = CancellationToken::new();
        Self {
            retry: Arc::new(RetryCoordinator::new(config.retry.clone(), cancel.clone())),
            cancel,
            runtime: None,
        }
    }
}

/// Where a presence lookup was answered from.
enum Lookup {
    Record(PresenceRecord),
    Profile(ProfileMirror),
}

/// Presence API for the signed-in user.
///
/// Owns every piece of in-process presence state: the cache, the connection
/// monitor, the heartbeat, the lifecycle debouncer, and all spawned tasks.
#[derive(Debug)]
pub struct PresenceService {
    ctx: Arc<PresenceContext>,
    session: Mutex<Session>,
    lifecycle: LifecycleObserver,
    foreground: Arc<AtomicBool>,
}

impl PresenceService {
    /// Create the service for an authenticated user.
    ///
    /// An empty `user_id` means no one is signed in and presence is skipped.
    pub fn new(
        user_id: &str,
        stores: PresenceStores,
        config: PresenceConfig,
        clock: SharedClock,
    ) -> AppResult<Self> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(AppError::authentication(
                "No authenticated user, skipping presence",
            ));
        }
        config.validate()?;

        let ctx = Arc::new(PresenceContext::new(user_id, stores, config, clock));
        info!(user = %ctx.user, "Presence service created");

        Ok(Self {
            session: Mutex::new(Session::fresh(&ctx.config)),
            lifecycle: LifecycleObserver::new(ctx.config.debounce()),
            foreground: Arc::new(AtomicBool::new(true)),
            ctx,
        })
    }

    /// Encoded key of the signed-in user.
    pub fn user_key(&self) -> &UserKey {
        &self.ctx.user
    }

    /// Raw id of the signed-in user.
    pub fn user_id(&self) -> &str {
        &self.ctx.user_id
    }

    /// Start the connection monitor and heartbeat. Calling again is a no-op.
    ///
    /// Failures are logged and turn into a scheduled connection retry.
    pub async fn initialize(&self) {
        let monitor = {
            let mut session = self.lock_session();
            if session.runtime.is_some() {
                debug!(user = %self.ctx.user, "Presence already initialized");
                return;
            }
            let monitor = Arc::new(ConnectionStateMonitor::new(
                Arc::clone(&self.ctx),
                Arc::clone(&session.retry),
                session.cancel.child_token(),
            ));
            let heartbeat = Arc::new(HeartbeatScheduler::new(
                Arc::clone(&self.ctx),
                Arc::clone(&monitor),
                Arc::clone(&self.foreground),
                session.cancel.child_token(),
            ));
            monitor.start();
            heartbeat.start();
            session.runtime = Some(Runtime {
                monitor: Arc::clone(&monitor),
                heartbeat,
            });
            monitor
        };

        let ctx = &self.ctx;
        let read = ctx.ephemeral().read_record(&ctx.user);
        match bounded(ctx.config.read_timeout(), "read_record", read).await {
            Ok(Some(record)) => ctx.cache.put(&ctx.user, record).await,
            Ok(None) => {}
            Err(e) => {
                warn!(user = %ctx.user, error = %e, "Initial presence read failed, scheduling connection retry");
                monitor.schedule_reconnect();
            }
        }
        info!(user = %ctx.user, "Presence initialized");
    }

    /// Initialization state.
    pub fn state(&self) -> ServiceState {
        if self.lock_session().runtime.is_some() {
            ServiceState::Initialized
        } else {
            ServiceState::Uninitialized
        }
    }

    /// Connection monitor state; `Disconnected` before initialization.
    pub fn connection_state(&self) -> ConnectionState {
        self.monitor()
            .map(|monitor| monitor.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// The running connection monitor.
    pub fn monitor(&self) -> Option<Arc<ConnectionStateMonitor>> {
        self.lock_session()
            .runtime
            .as_ref()
            .map(|runtime| Arc::clone(&runtime.monitor))
    }

    /// The running heartbeat scheduler.
    pub fn heartbeat(&self) -> Option<Arc<HeartbeatScheduler>> {
        self.lock_session()
            .runtime
            .as_ref()
            .map(|runtime| Arc::clone(&runtime.heartbeat))
    }

    /// Counters for this service.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// Mark the signed-in user online. Returns `false` when dropped because
    /// another presence mutation was in flight.
    pub async fn set_online(&self) -> bool {
        self.set_presence(true, "set_online").await
    }

    /// Mark the signed-in user offline. Returns `false` when dropped because
    /// another presence mutation was in flight.
    pub async fn set_offline(&self) -> bool {
        self.set_presence(false, "set_offline").await
    }

    async fn set_presence(&self, online: bool, operation: &'static str) -> bool {
        let Some(_permit) = self.ctx.guard.try_acquire(operation) else {
            PresenceMetrics::inc(&self.ctx.metrics.mutations_dropped);
            info!(user = %self.ctx.user, operation, "Presence mutation in flight, dropped");
            return false;
        };
        self.write_presence(online, PresenceSource::Manual).await;
        true
    }

    /// Ephemeral then durable write; the durable write happens regardless
    /// of the ephemeral outcome. Caller holds the guard.
    async fn write_presence(&self, online: bool, source: PresenceSource) {
        let ctx = &self.ctx;
        let timeout = ctx.config.write_timeout();

        let active = self.monitor().and_then(|monitor| monitor.active_connection_id());
        if online && self.connection_state() != ConnectionState::Connected {
            debug!(user = %ctx.user, "No registered connection, online flag left to the monitor");
        } else {
            let mut patch = PresencePatch::new()
                .online(online)
                .last_seen(Stamp::Server);
            if online {
                patch = patch.active_connection(active);
            }
            let write = ctx.ephemeral().update_record(&ctx.user, patch);
            if let Err(e) = bounded(timeout, "update_record", write).await {
                warn!(user = %ctx.user, online, error = %e, "Ephemeral presence write failed");
            }
        }

        self.write_profile(ProfilePatch::presence(online, source)).await;
        ctx.cache.invalidate(&ctx.user).await;
        debug!(user = %ctx.user, online, ?source, "Presence written");
    }

    /// Durable write; on failure it is retried in the background.
    async fn write_profile(&self, patch: ProfilePatch) {
        let ctx = &self.ctx;
        let write = ctx.durable().update_profile(&ctx.user_id, patch.clone());
        let Err(e) = bounded(ctx.config.write_timeout(), "update_profile", write).await else {
            return;
        };
        warn!(user = %ctx.user, error = %e, "Durable write failed, retrying in background");

        let ctx = Arc::clone(&self.ctx);
        let (cancel, retry) = {
            let session = self.lock_session();
            (session.cancel.clone(), Arc::clone(&session.retry))
        };
        tokio::spawn(async move {
            let attempt = retry.retry("update_profile", |_| {
                let ctx = Arc::clone(&ctx);
                let patch = patch.clone();
                async move {
                    bounded(
                        ctx.config.write_timeout(),
                        "update_profile",
                        ctx.durable().update_profile(&ctx.user_id, patch),
                    )
                    .await
                }
            });
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = attempt => {
                    if let Err(e) = result {
                        warn!(user = %ctx.user, error = %e, "Durable write abandoned");
                    }
                }
            }
        });
    }

    /// Whether `user_id` is online. Fails closed.
    pub async fn is_online(&self, user_id: &str) -> bool {
        let now = self.ctx.clock.now();
        match self.lookup(user_id).await {
            Some(Lookup::Record(record)) => self.ctx.evaluator.evaluate(&record, now),
            Some(Lookup::Profile(profile)) => self.ctx.evaluator.evaluate_profile(&profile, now),
            None => false,
        }
    }

    /// When `user_id` was last seen, if any source knows.
    pub async fn get_last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        match self.lookup(user_id).await? {
            Lookup::Record(record) => Some(record.last_seen),
            Lookup::Profile(profile) => profile.last_seen,
        }
    }

    /// Display status for `user_id`.
    pub async fn presence_status(&self, user_id: &str) -> PresenceStatus {
        let now = self.ctx.clock.now();
        match self.lookup(user_id).await {
            Some(Lookup::Record(record)) => self.ctx.evaluator.status(&record, now),
            Some(Lookup::Profile(profile)) if self.ctx.evaluator.evaluate_profile(&profile, now) => {
                PresenceStatus::Online
            }
            Some(Lookup::Profile(profile)) => PresenceStatus::Offline {
                last_seen: profile.last_seen,
            },
            None => PresenceStatus::Offline { last_seen: None },
        }
    }

    /// Cache, then ephemeral store, then durable mirror. A malformed or
    /// missing payload counts as a miss.
    async fn lookup(&self, user_id: &str) -> Option<Lookup> {
        let ctx = &self.ctx;
        let user = UserKey::encode(user_id);
        if let Some(record) = ctx.cache.get(&user).await {
            return Some(Lookup::Record(record));
        }

        let read = ctx.ephemeral().read_record(&user);
        match bounded(ctx.config.read_timeout(), "read_record", read).await {
            Ok(Some(record)) => {
                ctx.cache.put(&user, record.clone()).await;
                return Some(Lookup::Record(record));
            }
            Ok(None) => debug!(user = %user, "No ephemeral record"),
            Err(e) => debug!(user = %user, error = %e, "Ephemeral read failed"),
        }

        let read = ctx.durable().read_profile(user_id);
        match bounded(ctx.config.read_timeout(), "read_profile", read).await {
            Ok(Some(profile)) => {
                PresenceMetrics::inc(&ctx.metrics.durable_fallbacks);
                Some(Lookup::Profile(profile))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(user = %user, error = %e, "Presence unavailable from every source");
                None
            }
        }
    }

    /// Live presence feed for `user_id`.
    ///
    /// Every record updates the cache. A feed error re-publishes the last
    /// cached record and the stream carries on. The stream ends on
    /// [`dispose`](Self::dispose).
    pub fn presence_stream(&self, user_id: &str) -> PresenceStream {
        let user = UserKey::encode(user_id);
        let feed = self.ctx.ephemeral().watch_record(&user);
        let cancel = self.lock_session().cancel.clone();
        let ctx = Arc::clone(&self.ctx);

        Box::pin(futures::stream::unfold(
            (feed, ctx, user, cancel),
            |(mut feed, ctx, user, cancel)| async move {
                let next = tokio::select! {
                    _ = cancel.cancelled() => None,
                    item = feed.next() => item,
                };
                let value = match next? {
                    Ok(Some(record)) => {
                        ctx.cache.put(&user, record.clone()).await;
                        Some(record)
                    }
                    Ok(None) => {
                        ctx.cache.invalidate(&user).await;
                        None
                    }
                    Err(e) => {
                        PresenceMetrics::inc(&ctx.metrics.stream_errors);
                        warn!(user = %user, error = %e, "Presence feed error, re-publishing last known record");
                        ctx.cache.last_known(&user).await.map(|entry| entry.record)
                    }
                };
                Some((value, (feed, ctx, user, cancel)))
            },
        ))
    }

    /// Write profile fields to both stores. The durable write proceeds even
    /// when the ephemeral write fails.
    pub async fn update_user_info(&self, info: UserInfo) {
        let ctx = &self.ctx;
        let write = ctx
            .ephemeral()
            .update_record(&ctx.user, PresencePatch::new().user_info(info.clone()));
        if let Err(e) = bounded(ctx.config.write_timeout(), "update_record", write).await {
            warn!(user = %ctx.user, error = %e, "Ephemeral user info write failed");
        }
        self.write_profile(ProfilePatch::user_info(info)).await;
        ctx.cache.invalidate(&ctx.user).await;
    }

    /// Apply an app lifecycle transition.
    ///
    /// Foreground and background are debounced into one online/offline
    /// change. Terminate cancels any pending change and goes offline now.
    pub async fn handle_lifecycle(self: &Arc<Self>, event: AppLifecycle) {
        self.foreground
            .store(event.is_foreground(), Ordering::SeqCst);
        debug!(user = %self.ctx.user, ?event, "Lifecycle transition");

        match event {
            AppLifecycle::Foreground | AppLifecycle::Background => {
                let service = Arc::downgrade(self);
                self.lifecycle
                    .debouncer()
                    .set_state(event.is_foreground(), move |online| async move {
                        let Some(service) = service.upgrade() else {
                            return;
                        };
                        if online {
                            service.set_online().await;
                        } else {
                            service.set_offline().await;
                        }
                    });
            }
            AppLifecycle::Terminate => {
                self.lifecycle.cancel();
                self.set_offline().await;
            }
        }
    }

    /// Online flag waiting for the lifecycle quiet period, if any.
    pub fn pending_lifecycle(&self) -> Option<bool> {
        self.lifecycle.pending()
    }

    /// Go offline, remove this connection's session, and tear down.
    ///
    /// Safe to call on a partially initialized or uninitialized service.
    pub async fn sign_out(&self) {
        let ctx = &self.ctx;
        let permit = match ctx
            .guard
            .acquire_within("sign_out", ctx.config.write_timeout())
            .await
        {
            Ok(permit) => Some(permit),
            Err(e) => {
                warn!(user = %ctx.user, error = %e, "Signing out while a presence mutation is in flight");
                None
            }
        };
        self.lifecycle.cancel();

        let active = self
            .monitor()
            .and_then(|monitor| monitor.take_active_connection());
        self.write_presence(false, PresenceSource::Manual).await;

        if let Some(id) = active {
            let path = PresencePath::Session(ctx.user.clone(), id);
            let remove = ctx.ephemeral().remove_path(path.clone());
            match bounded(ctx.config.write_timeout(), "remove_path", remove).await {
                Ok(()) => debug!(path = %path, "Connection session removed"),
                Err(e) => warn!(path = %path, error = %e, "Connection session removal failed"),
            }
        }

        drop(permit);
        self.dispose();
        info!(user = %ctx.user, "Signed out of presence");
    }

    /// Cancel every timer, subscription, and retry; clear the cache; return
    /// to the uninitialized state. No presence is written.
    pub fn dispose(&self) {
        self.lifecycle.cancel();
        let session = std::mem::replace(&mut *self.lock_session(), Session::fresh(&self.ctx.config));
        session.cancel.cancel();
        if let Some(runtime) = session.runtime {
            runtime.heartbeat.stop();
            runtime.monitor.stop();
        }
        self.ctx.cache.clear();
        debug!(user = %self.ctx.user, "Presence disposed");
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for PresenceService {
    fn drop(&mut self) {
        self.lock_session().cancel.cancel();
    }
}

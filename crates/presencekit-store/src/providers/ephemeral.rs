//! In-memory ephemeral presence store.
//!
//! [`MemoryPresenceServer`] plays the backing real-time store: it owns the
//! records and live feeds and executes disconnect cleanup directives.
//! Each [`MemoryEphemeralStore`] is one client's connection to it, with its
//! own transport signal and its own registered directives.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use presencekit_core::clock::SharedClock;
use presencekit_core::error::AppError;
use presencekit_core::result::AppResult;
use presencekit_core::traits::{ConnectedStream, EphemeralPresenceStore, RecordStream};
use presencekit_core::types::{
    CleanupAction, ConnectionId, ConnectionSession, PresencePatch, PresencePath, PresenceRecord,
    UserKey,
};

/// Buffer size of each per-user live feed.
const FEED_CAPACITY: usize = 64;

type FeedItem = AppResult<Option<PresenceRecord>>;

/// Operation counters kept by the server.
#[derive(Debug, Default)]
pub struct ServerStats {
    writes: AtomicU64,
    session_creates: AtomicU64,
    cleanup_removals: AtomicU64,
    explicit_removals: AtomicU64,
    reads: AtomicU64,
}

impl ServerStats {
    /// Record writes (`set_record`, `update_record`, `put_session`).
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Connection sessions created.
    pub fn session_creates(&self) -> u64 {
        self.session_creates.load(Ordering::SeqCst)
    }

    /// Sessions removed by a disconnect directive.
    pub fn cleanup_removals(&self) -> u64 {
        self.cleanup_removals.load(Ordering::SeqCst)
    }

    /// Sessions removed by an explicit `remove_path`.
    pub fn explicit_removals(&self) -> u64 {
        self.explicit_removals.load(Ordering::SeqCst)
    }

    /// Record reads.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Shared state of the in-memory real-time store.
#[derive(Debug)]
pub struct MemoryPresenceServer {
    /// User → record.
    records: DashMap<UserKey, PresenceRecord>,
    /// Injected raw payloads, decoded on read in place of the typed record.
    raw: DashMap<UserKey, serde_json::Value>,
    /// User → live feed.
    feeds: DashMap<UserKey, broadcast::Sender<FeedItem>>,
    /// Server clock for `Stamp::Server`.
    clock: SharedClock,
    stats: ServerStats,
}

impl MemoryPresenceServer {
    /// Create an empty server.
    pub fn new(clock: SharedClock) -> Arc<Self> {
        Arc::new(Self {
            records: DashMap::new(),
            raw: DashMap::new(),
            feeds: DashMap::new(),
            clock,
            stats: ServerStats::default(),
        })
    }

    /// Open a new client connection. The transport starts connected.
    pub fn client(self: &Arc<Self>) -> MemoryEphemeralStore {
        let (connected, _) = watch::channel(true);
        MemoryEphemeralStore {
            server: Arc::clone(self),
            connected,
            reachable: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            cleanups: Mutex::new(Vec::new()),
        }
    }

    /// Operation counters.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Inspect the stored record without going through a client.
    pub fn record(&self, user: &UserKey) -> Option<PresenceRecord> {
        self.records.get(user).map(|r| r.value().clone())
    }

    /// Store a raw payload for `user`; reads decode it until the next write.
    pub fn inject_raw(&self, user: &UserKey, value: serde_json::Value) {
        self.raw.insert(user.clone(), value);
    }

    /// Push an error into the live feed of `user`.
    pub fn inject_feed_error(&self, user: &UserKey, err: AppError) {
        if let Some(tx) = self.feeds.get(user) {
            let _ = tx.send(Err(err));
        }
    }

    fn decode(&self, user: &UserKey) -> FeedItem {
        if let Some(raw) = self.raw.get(user) {
            return PresenceRecord::from_value(raw.value().clone()).map(Some);
        }
        Ok(self.records.get(user).map(|r| r.value().clone()))
    }

    fn notify(&self, user: &UserKey) {
        if let Some(tx) = self.feeds.get(user) {
            let _ = tx.send(self.decode(user));
        }
    }

    fn mutate(
        &self,
        user: &UserKey,
        f: impl FnOnce(&mut PresenceRecord, chrono::DateTime<chrono::Utc>),
    ) {
        let now = self.clock.now();
        {
            let mut record = self
                .records
                .entry(user.clone())
                .or_insert_with(|| PresenceRecord::offline(now));
            f(record.value_mut(), now);
        }
        self.raw.remove(user);
        self.notify(user);
    }

    fn watch(&self, user: &UserKey) -> RecordStream {
        let rx = self
            .feeds
            .entry(user.clone())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe();
        let initial = self.decode(user);

        let live = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(item) => return Some((item, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Presence feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Box::pin(futures::stream::once(async move { initial }).chain(live))
    }

    /// Remove a session; when none remain the record goes offline.
    fn remove_session(&self, user: &UserKey, id: &ConnectionId) -> bool {
        let now = self.clock.now();
        let removed = match self.records.get_mut(user) {
            Some(mut record) => {
                let removed = record.connections.remove(id).is_some();
                if record.active_connection_id.as_ref() == Some(id) {
                    record.active_connection_id = None;
                }
                if record.has_connections() {
                    record.updated_at = now;
                } else {
                    record.apply(&PresencePatch::went_offline(), now);
                }
                removed
            }
            None => false,
        };
        self.notify(user);
        removed
    }

    fn mark_offline_if_idle(&self, user: &UserKey) {
        let now = self.clock.now();
        let changed = match self.records.get_mut(user) {
            Some(mut record) if !record.has_connections() => {
                record.apply(&PresencePatch::went_offline(), now);
                true
            }
            _ => false,
        };
        if changed {
            self.notify(user);
        }
    }

    /// Run directives for a dropped client. Session directives go first so
    /// record-level directives see the remaining sessions.
    fn execute_cleanups(&self, directives: Vec<(PresencePath, CleanupAction)>) {
        let (sessions, records): (Vec<_>, Vec<_>) = directives
            .into_iter()
            .partition(|(path, _)| matches!(path, PresencePath::Session(..)));

        for (path, action) in sessions.into_iter().chain(records) {
            match (&path, &action) {
                (PresencePath::Session(user, id), CleanupAction::RemoveSession) => {
                    if self.remove_session(user, id) {
                        self.stats.cleanup_removals.fetch_add(1, Ordering::SeqCst);
                    }
                }
                (PresencePath::Session(user, id), CleanupAction::MarkOffline) => {
                    self.mutate(user, |record, now| {
                        if let Some(session) = record.connections.get_mut(id) {
                            session.connected = false;
                            session.last_seen = now;
                        }
                    });
                }
                (PresencePath::Record(user), CleanupAction::MarkOffline) => {
                    self.mark_offline_if_idle(user);
                }
                (PresencePath::Record(user), CleanupAction::RemoveSession) => {
                    self.records.remove(user);
                    self.notify(user);
                }
            }
            debug!(path = %path, action = ?action, "Executed disconnect cleanup");
        }
    }
}

/// One client's connection to a [`MemoryPresenceServer`].
#[derive(Debug)]
pub struct MemoryEphemeralStore {
    server: Arc<MemoryPresenceServer>,
    /// Transport-connected signal.
    connected: watch::Sender<bool>,
    /// Whether calls reach the server.
    reachable: AtomicBool,
    /// Artificial latency added to every call.
    latency_ms: AtomicU64,
    /// Directives registered by this client.
    cleanups: Mutex<Vec<(PresencePath, CleanupAction)>>,
}

impl MemoryEphemeralStore {
    /// The server this client talks to.
    pub fn server(&self) -> &Arc<MemoryPresenceServer> {
        &self.server
    }

    /// Current transport state.
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Number of directives the server would run on a drop.
    pub fn pending_cleanups(&self) -> usize {
        self.cleanups.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop the transport; the server notices and runs this client's directives.
    pub fn drop_connection(&self) {
        let directives =
            std::mem::take(&mut *self.cleanups.lock().unwrap_or_else(|e| e.into_inner()));
        self.reachable.store(false, Ordering::SeqCst);
        info!(count = directives.len(), "Transport dropped, running disconnect cleanup");
        self.server.execute_cleanups(directives);
        self.connected.send_replace(false);
    }

    /// Drop the transport without the server ever running the directives.
    pub fn drop_connection_silently(&self) {
        self.cleanups.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.reachable.store(false, Ordering::SeqCst);
        info!("Transport dropped, disconnect cleanup missed");
        self.connected.send_replace(false);
    }

    /// Re-establish the transport.
    pub fn restore_connection(&self) {
        self.reachable.store(true, Ordering::SeqCst);
        self.connected.send_replace(true);
    }

    /// Re-emit the current transport value, as a store does on reflow.
    pub fn reflow_connected(&self) {
        let current = *self.connected.borrow();
        self.connected.send_replace(current);
    }

    /// Make calls fail without touching the transport signal.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn gate(&self, operation: &str) -> AppResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(AppError::service_unavailable(format!(
                "Ephemeral store unreachable during {operation}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EphemeralPresenceStore for MemoryEphemeralStore {
    async fn set_record(&self, user: &UserKey, record: PresenceRecord) -> AppResult<()> {
        self.gate("set_record").await?;
        self.server.records.insert(user.clone(), record);
        self.server.raw.remove(user);
        self.server.stats.writes.fetch_add(1, Ordering::SeqCst);
        self.server.notify(user);
        Ok(())
    }

    async fn update_record(&self, user: &UserKey, patch: PresencePatch) -> AppResult<()> {
        self.gate("update_record").await?;
        self.server.mutate(user, |record, now| record.apply(&patch, now));
        self.server.stats.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn put_session(&self, user: &UserKey, session: ConnectionSession) -> AppResult<()> {
        self.gate("put_session").await?;
        self.server.mutate(user, |record, now| {
            record.connections.insert(session.connection_id.clone(), session);
            record.updated_at = now;
        });
        self.server.stats.writes.fetch_add(1, Ordering::SeqCst);
        self.server.stats.session_creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn watch_connected(&self) -> ConnectedStream {
        let rx = self.connected.subscribe();
        Box::pin(futures::stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first {
                rx.changed().await.ok()?;
            }
            let value = *rx.borrow_and_update();
            Some((value, (rx, false)))
        }))
    }

    async fn attach_disconnect_cleanup(
        &self,
        path: PresencePath,
        action: CleanupAction,
    ) -> AppResult<()> {
        self.gate("attach_disconnect_cleanup").await?;
        let mut cleanups = self.cleanups.lock().unwrap_or_else(|e| e.into_inner());
        cleanups.retain(|(existing, _)| existing != &path);
        cleanups.push((path, action));
        Ok(())
    }

    async fn remove_path(&self, path: PresencePath) -> AppResult<()> {
        self.gate("remove_path").await?;
        self.cleanups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(existing, _)| existing != &path);

        match &path {
            PresencePath::Session(user, id) => {
                if self.server.remove_session(user, id) {
                    self.server.stats.explicit_removals.fetch_add(1, Ordering::SeqCst);
                }
            }
            PresencePath::Record(user) => {
                self.server.records.remove(user);
                self.server.raw.remove(user);
                self.server.notify(user);
            }
        }
        Ok(())
    }

    async fn read_record(&self, user: &UserKey) -> AppResult<Option<PresenceRecord>> {
        self.gate("read_record").await?;
        self.server.stats.reads.fetch_add(1, Ordering::SeqCst);
        self.server.decode(user)
    }

    fn watch_record(&self, user: &UserKey) -> RecordStream {
        self.server.watch(user)
    }
}

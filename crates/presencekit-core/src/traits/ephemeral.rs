//! Adapter over the fast real-time presence store.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::result::AppResult;
use crate::types::{
    CleanupAction, ConnectionSession, PresencePatch, PresencePath, PresenceRecord, UserKey,
};

/// Stream of transport-connected transitions.
pub type ConnectedStream = Pin<Box<dyn Stream<Item = bool> + Send>>;

/// Stream of live record snapshots for one user.
pub type RecordStream = Pin<Box<dyn Stream<Item = AppResult<Option<PresenceRecord>>> + Send>>;

/// Trait for the ephemeral presence store.
///
/// The store must be able to run a [`CleanupAction`] on its own when it
/// notices this client's transport has dropped, even if the client process
/// is gone. Backends without that primitive emulate it with a lease
/// refreshed by the heartbeat; readers then rely on the staleness heuristic.
#[async_trait]
pub trait EphemeralPresenceStore: Send + Sync + std::fmt::Debug + 'static {
    /// Replace the whole record for `user`.
    async fn set_record(&self, user: &UserKey, record: PresenceRecord) -> AppResult<()>;

    /// Apply a partial update, creating an offline record first if needed.
    async fn update_record(&self, user: &UserKey, patch: PresencePatch) -> AppResult<()>;

    /// Write a connection session under the user's record.
    async fn put_session(&self, user: &UserKey, session: ConnectionSession) -> AppResult<()>;

    /// Transport connectivity to this store. The current value is emitted
    /// first, then every change.
    fn watch_connected(&self) -> ConnectedStream;

    /// Register an action the store runs when this client's transport drops.
    async fn attach_disconnect_cleanup(
        &self,
        path: PresencePath,
        action: CleanupAction,
    ) -> AppResult<()>;

    /// Delete the value at `path`, together with any cleanup attached to it.
    async fn remove_path(&self, path: PresencePath) -> AppResult<()>;

    /// Read the current record for `user`.
    async fn read_record(&self, user: &UserKey) -> AppResult<Option<PresenceRecord>>;

    /// Live feed of the record for `user`, starting with its current value.
    fn watch_record(&self, user: &UserKey) -> RecordStream;
}

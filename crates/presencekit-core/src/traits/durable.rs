//! Adapter over the durable profile store.

use async_trait::async_trait;

use crate::result::AppResult;
use crate::types::{ProfileMirror, ProfilePatch};

/// Trait for the durable profile store holding the presence mirror.
///
/// Keyed by the raw user id; the durable store has no path restrictions.
#[async_trait]
pub trait DurablePresenceMirror: Send + Sync + std::fmt::Debug + 'static {
    /// Merge `patch` into the user's profile.
    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> AppResult<()>;

    /// Read the user's profile presence fields.
    async fn read_profile(&self, user_id: &str) -> AppResult<Option<ProfileMirror>>;
}

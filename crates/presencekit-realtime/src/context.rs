//! Shared state of one signed-in presence session.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use presencekit_cache::PresenceCache;
use presencekit_core::clock::SharedClock;
use presencekit_core::config::PresenceConfig;
use presencekit_core::error::AppError;
use presencekit_core::result::AppResult;
use presencekit_core::traits::{DurablePresenceMirror, EphemeralPresenceStore};
use presencekit_core::types::UserKey;

use crate::connection::guard::OperationGuard;
use crate::metrics::PresenceMetrics;
use crate::presence::evaluator::OnlineEvaluator;

/// The two store adapters a session talks to.
#[derive(Debug, Clone)]
pub struct PresenceStores {
    /// Real-time store with disconnect cleanup.
    pub ephemeral: Arc<dyn EphemeralPresenceStore>,
    /// Durable profile mirror.
    pub durable: Arc<dyn DurablePresenceMirror>,
}

impl PresenceStores {
    /// Bundle two adapters.
    pub fn new(
        ephemeral: Arc<dyn EphemeralPresenceStore>,
        durable: Arc<dyn DurablePresenceMirror>,
    ) -> Self {
        Self { ephemeral, durable }
    }
}

/// Everything the monitor, heartbeat, and service share for one user.
#[derive(Debug)]
pub struct PresenceContext {
    /// Raw authenticated user id, used as the durable key.
    pub user_id: String,
    /// Encoded ephemeral key.
    pub user: UserKey,
    pub stores: PresenceStores,
    pub config: PresenceConfig,
    pub clock: SharedClock,
    /// Admits one presence mutation at a time.
    pub guard: OperationGuard,
    pub cache: PresenceCache,
    pub evaluator: OnlineEvaluator,
    pub metrics: Arc<PresenceMetrics>,
}

impl PresenceContext {
    /// Build the context for `user_id`.
    pub fn new(
        user_id: &str,
        stores: PresenceStores,
        config: PresenceConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            user: UserKey::encode(user_id),
            cache: PresenceCache::new(&config, clock.clone()),
            evaluator: OnlineEvaluator::new(&config.staleness),
            stores,
            config,
            clock,
            guard: OperationGuard::new(),
            metrics: Arc::new(PresenceMetrics::new()),
        }
    }

    /// Ephemeral adapter.
    pub fn ephemeral(&self) -> &Arc<dyn EphemeralPresenceStore> {
        &self.stores.ephemeral
    }

    /// Durable adapter.
    pub fn durable(&self) -> &Arc<dyn DurablePresenceMirror> {
        &self.stores.durable
    }
}

/// Run a store call under a timeout.
pub async fn bounded<T, Fut>(after: Duration, operation: &str, fut: Fut) -> AppResult<T>
where
    Fut: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(operation, after)),
    }
}

//! Presence cache implementation using the moka crate.

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tracing::trace;

use presencekit_core::clock::SharedClock;
use presencekit_core::config::PresenceConfig;
use presencekit_core::types::{PresenceRecord, UserKey};

/// A cached record and the time it was written.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Last-known record.
    pub record: PresenceRecord,
    /// When the record entered the cache.
    pub cached_at: DateTime<Utc>,
}

/// Short-TTL cache of presence records keyed by user.
///
/// An entry older than the TTL is a miss for [`get`](Self::get), never
/// stale-but-usable. Expired entries stay resident until overwritten or
/// evicted by capacity so [`last_known`](Self::last_known) can still serve
/// them.
#[derive(Debug, Clone)]
pub struct PresenceCache {
    /// Underlying moka cache.
    cache: Cache<UserKey, CacheEntry>,
    /// Logical time-to-live.
    ttl: chrono::Duration,
    /// Time source for `cached_at`.
    clock: SharedClock,
}

impl PresenceCache {
    /// Create a cache from configuration.
    pub fn new(config: &PresenceConfig, clock: SharedClock) -> Self {
        Self::with_ttl(config.cache_ttl(), config.cache_max_capacity, clock)
    }

    /// Create a cache with an explicit TTL and capacity.
    pub fn with_ttl(ttl: Duration, max_capacity: u64, clock: SharedClock) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();

        Self {
            cache,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(45)),
            clock,
        }
    }

    /// Return the cached record if it is younger than the TTL.
    pub async fn get(&self, user: &UserKey) -> Option<PresenceRecord> {
        let entry = self.cache.get(user).await?;
        if self.clock.now() - entry.cached_at < self.ttl {
            Some(entry.record)
        } else {
            trace!(user = %user, "Presence cache entry expired");
            None
        }
    }

    /// Return the most recent entry regardless of age.
    ///
    /// Used only to keep a live feed publishing after a stream error.
    pub async fn last_known(&self, user: &UserKey) -> Option<CacheEntry> {
        self.cache.get(user).await
    }

    /// Overwrite the entry for `user` with the newest data.
    pub async fn put(&self, user: &UserKey, record: PresenceRecord) {
        let entry = CacheEntry {
            record,
            cached_at: self.clock.now(),
        };
        self.cache.insert(user.clone(), entry).await;
    }

    /// Drop the entry for `user`.
    pub async fn invalidate(&self, user: &UserKey) {
        self.cache.invalidate(user).await;
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use presencekit_core::clock::{SystemClock, TokioClock};
    use std::sync::Arc;

    fn make_cache() -> PresenceCache {
        PresenceCache::with_ttl(Duration::from_secs(45), 100, TokioClock::new().shared())
    }

    fn record(online: bool) -> PresenceRecord {
        let mut record = PresenceRecord::offline(Utc::now());
        record.online = online;
        record
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_get() {
        let cache = make_cache();
        let user = UserKey::encode("ann");
        cache.put(&user, record(true)).await;
        assert!(cache.get(&user).await.unwrap().online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = make_cache();
        let user = UserKey::encode("ann");
        cache.put(&user, record(true)).await;

        tokio::time::advance(Duration::from_secs(44)).await;
        assert!(cache.get(&user).await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&user).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_known_ignores_ttl() {
        let cache = make_cache();
        let user = UserKey::encode("ann");
        cache.put(&user, record(true)).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.last_known(&user).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_get_keeps_last_known() {
        let cache = make_cache();
        let user = UserKey::encode("ann");
        cache.put(&user, record(true)).await;

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(cache.get(&user).await.is_none());

        let entry = cache.last_known(&user).await.unwrap();
        assert!(entry.record.online);
    }

    #[tokio::test]
    async fn test_last_known_survives_wall_clock_ttl() {
        let cache = PresenceCache::with_ttl(Duration::from_millis(200), 100, Arc::new(SystemClock));
        let user = UserKey::encode("ann");
        cache.put(&user, record(true)).await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        cache.cache.run_pending_tasks().await;

        assert!(cache.get(&user).await.is_none());
        assert!(cache.last_known(&user).await.unwrap().record.online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites_and_refreshes() {
        let cache = make_cache();
        let user = UserKey::encode("ann");
        cache.put(&user, record(true)).await;
        tokio::time::advance(Duration::from_secs(40)).await;
        cache.put(&user, record(false)).await;
        tokio::time::advance(Duration::from_secs(40)).await;

        let cached = cache.get(&user).await.unwrap();
        assert!(!cached.online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_and_invalidate() {
        let cache = make_cache();
        let ann = UserKey::encode("ann");
        let bob = UserKey::encode("bob");
        cache.put(&ann, record(true)).await;
        cache.put(&bob, record(true)).await;

        cache.invalidate(&ann).await;
        assert!(cache.get(&ann).await.is_none());
        assert!(cache.get(&bob).await.is_some());

        cache.clear();
        assert!(cache.get(&bob).await.is_none());
    }
}

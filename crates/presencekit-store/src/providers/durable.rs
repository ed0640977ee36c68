//! In-memory durable profile store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use presencekit_core::clock::SharedClock;
use presencekit_core::error::AppError;
use presencekit_core::result::AppResult;
use presencekit_core::traits::DurablePresenceMirror;
use presencekit_core::types::{ProfileMirror, ProfilePatch};

/// Durable profile store held in memory.
#[derive(Debug)]
pub struct MemoryDurableMirror {
    /// User id → profile.
    profiles: DashMap<String, ProfileMirror>,
    /// Injected raw payloads, decoded on read.
    raw: DashMap<String, serde_json::Value>,
    /// Every accepted patch, in order.
    history: Mutex<Vec<(String, ProfilePatch)>>,
    reachable: AtomicBool,
    latency_ms: AtomicU64,
    clock: SharedClock,
}

impl MemoryDurableMirror {
    /// Create an empty store.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            profiles: DashMap::new(),
            raw: DashMap::new(),
            history: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            clock,
        }
    }

    /// Make calls fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Inspect a profile directly.
    pub fn profile(&self, user_id: &str) -> Option<ProfileMirror> {
        self.profiles.get(user_id).map(|p| p.value().clone())
    }

    /// Store a raw payload for `user_id`; reads decode it until the next write.
    pub fn inject_raw(&self, user_id: &str, value: serde_json::Value) {
        self.raw.insert(user_id.to_string(), value);
    }

    /// Patches accepted for `user_id`, oldest first.
    pub fn history(&self, user_id: &str) -> Vec<ProfilePatch> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(id, _)| id == user_id)
            .map(|(_, patch)| patch.clone())
            .collect()
    }

    async fn gate(&self, operation: &str) -> AppResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(AppError::service_unavailable(format!(
                "Durable store unreachable during {operation}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DurablePresenceMirror for MemoryDurableMirror {
    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> AppResult<()> {
        self.gate("update_profile").await?;
        let now = self.clock.now();
        self.profiles
            .entry(user_id.to_string())
            .or_insert_with(ProfileMirror::empty)
            .apply(&patch, now);
        self.raw.remove(user_id);
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((user_id.to_string(), patch));
        Ok(())
    }

    async fn read_profile(&self, user_id: &str) -> AppResult<Option<ProfileMirror>> {
        self.gate("read_profile").await?;
        if let Some(raw) = self.raw.get(user_id) {
            return ProfileMirror::from_value(raw.value().clone()).map(Some);
        }
        Ok(self.profile(user_id))
    }
}

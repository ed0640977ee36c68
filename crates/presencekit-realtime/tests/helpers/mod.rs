//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use presencekit_core::clock::{SharedClock, TokioClock};
use presencekit_core::config::PresenceConfig;
use presencekit_core::traits::{DurablePresenceMirror, EphemeralPresenceStore};
use presencekit_core::types::{PresenceSource, ProfilePatch, UserKey};
use presencekit_realtime::{PresenceService, PresenceStores};
use presencekit_store::{MemoryDurableMirror, MemoryEphemeralStore, MemoryPresenceServer};

/// Signed-in user driven by most tests.
pub const ANN: &str = "ann@example.com";
/// A second user watching `ANN`.
pub const BOB: &str = "bob@example.com";

/// One backend with a signed-in client.
pub struct TestApp {
    pub clock: SharedClock,
    pub server: Arc<MemoryPresenceServer>,
    pub client: Arc<MemoryEphemeralStore>,
    pub durable: Arc<MemoryDurableMirror>,
    pub service: Arc<PresenceService>,
    pub user: UserKey,
}

impl TestApp {
    /// Create a backend and a service for `ANN` with default settings.
    pub fn new() -> Self {
        Self::with_config(PresenceConfig::default())
    }

    /// Create a backend and a service for `ANN`.
    pub fn with_config(config: PresenceConfig) -> Self {
        let clock = TokioClock::new().shared();
        let server = MemoryPresenceServer::new(clock.clone());
        let durable = Arc::new(MemoryDurableMirror::new(clock.clone()));
        let client = Arc::new(server.client());
        let service = Arc::new(
            PresenceService::new(ANN, stores(&client, &durable), config, clock.clone())
                .expect("Failed to create presence service"),
        );

        Self {
            clock,
            server,
            client,
            durable,
            service,
            user: UserKey::encode(ANN),
        }
    }

    /// Initialize and wait for the connect transition to settle.
    pub async fn connected() -> Self {
        let app = Self::new();
        app.service.initialize().await;
        settle().await;
        app
    }

    /// Another user's client on the same backend.
    pub fn viewer(&self, user_id: &str) -> (Arc<MemoryEphemeralStore>, Arc<PresenceService>) {
        let client = Arc::new(self.server.client());
        let service = Arc::new(
            PresenceService::new(
                user_id,
                stores(&client, &self.durable),
                PresenceConfig::default(),
                self.clock.clone(),
            )
            .expect("Failed to create viewer service"),
        );
        (client, service)
    }

    /// Manual presence writes mirrored for `ANN`, oldest first.
    pub fn manual_patches(&self) -> Vec<ProfilePatch> {
        self.durable
            .history(ANN)
            .into_iter()
            .filter(|patch| patch.presence_source == Some(PresenceSource::Manual))
            .collect()
    }
}

fn stores(client: &Arc<MemoryEphemeralStore>, durable: &Arc<MemoryDurableMirror>) -> PresenceStores {
    let ephemeral: Arc<dyn EphemeralPresenceStore> = client.clone();
    let durable: Arc<dyn DurablePresenceMirror> = durable.clone();
    PresenceStores::new(ephemeral, durable)
}

/// Sleep past the settle delay.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1500)).await;
}

/// Let spawned tasks run without crossing any timer of interest.
pub async fn yield_briefly() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

//! # presencekit-realtime
//!
//! Presence engine for PresenceKit. Provides:
//!
//! - Connection-state monitoring with server-side disconnect cleanup
//! - Heartbeat liveness pulses
//! - Debounced foreground/background handling
//! - Dual-store mirroring with bounded linear-backoff retry
//! - Staleness-aware online evaluation over a short-TTL cache

pub mod connection;
pub mod context;
pub mod metrics;
pub mod presence;
pub mod service;

pub use connection::{
    ConnectionState, ConnectionStateMonitor, HeartbeatScheduler, OperationGuard, RetryCoordinator,
};
pub use context::{PresenceContext, PresenceStores};
pub use metrics::{MetricsSnapshot, PresenceMetrics};
pub use presence::{AppLifecycle, Debouncer, OnlineEvaluator, PresenceStatus, evaluate};
pub use service::{PresenceService, PresenceStream, ServiceState};

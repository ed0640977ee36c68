//! # presencekit-store
//!
//! Store adapter implementations for PresenceKit. The in-memory providers
//! model the two backends the engine talks to:
//!
//! - an ephemeral real-time store that runs disconnect cleanup directives on
//!   its own and exposes a transport-connected signal per client, and
//! - a durable profile store holding the presence mirror.
//!
//! Both support fault injection (unreachability, latency, malformed
//! payloads) so the engine's fallback paths can be exercised.

pub mod providers;

#[cfg(feature = "memory")]
pub use providers::{MemoryDurableMirror, MemoryEphemeralStore, MemoryPresenceServer, ServerStats};

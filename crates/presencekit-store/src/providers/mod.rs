//! Store provider implementations.

#[cfg(feature = "memory")]
pub mod durable;
#[cfg(feature = "memory")]
pub mod ephemeral;

#[cfg(feature = "memory")]
pub use durable::MemoryDurableMirror;
#[cfg(feature = "memory")]
pub use ephemeral::{MemoryEphemeralStore, MemoryPresenceServer, ServerStats};

//! Memory-backed presence cache.

pub mod store;

pub use store::{CacheEntry, PresenceCache};

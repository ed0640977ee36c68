//! # presencekit-cache
//!
//! In-process cache of last-known presence records, used as a read-through
//! layer in front of the stores and as a fallback when they are unreachable.
//!
//! Entries are held in [moka](https://crates.io/crates/moka) for capacity
//! bounding; freshness is judged against the engine's injected clock.

pub mod memory;

pub use memory::{CacheEntry, PresenceCache};

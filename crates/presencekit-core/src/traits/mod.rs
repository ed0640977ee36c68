//! Store adapter traits defined in `presencekit-core` and implemented by
//! `presencekit-store` (or by an application's own backend bindings).

pub mod durable;
pub mod ephemeral;

pub use durable::DurablePresenceMirror;
pub use ephemeral::{ConnectedStream, EphemeralPresenceStore, RecordStream};

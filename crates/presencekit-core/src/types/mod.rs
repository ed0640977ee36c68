//! Core type definitions used across the PresenceKit workspace.

pub mod id;
pub mod profile;
pub mod record;

pub use id::{ConnectionId, UserKey};
pub use profile::{PresenceSource, ProfileMirror, ProfilePatch};
pub use record::{
    CleanupAction, ConnectionSession, PresencePatch, PresencePath, PresenceRecord, Stamp, UserInfo,
};

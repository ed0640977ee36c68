//! Presence status definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rendered presence of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Fresh online data.
    Online,
    /// Offline, or online data too stale to trust.
    Offline {
        /// Last time the user was seen, when known.
        last_seen: Option<DateTime<Utc>>,
    },
}

impl PresenceStatus {
    /// Whether the user counts as online.
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }

    /// Converts to string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Online => "online",
            Self::Offline { .. } => "offline",
        }
    }
}

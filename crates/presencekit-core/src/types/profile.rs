//! Durable-store profile mirror.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::record::{Stamp, UserInfo};
use crate::error::AppError;
use crate::result::AppResult;

/// Which path produced the last presence write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceSource {
    /// Mirrored from a transport state transition.
    Realtime,
    /// Written by an explicit `set_online`/`set_offline`.
    Manual,
}

/// Presence fields of a user's durable profile.
///
/// A best-effort mirror: useful for last-seen history and offline reads,
/// never authoritative for "currently online".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMirror {
    /// Mirrored online flag.
    #[serde(default)]
    pub is_online: bool,
    /// Mirrored last-seen time.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// Time the presence fields were last written.
    #[serde(default)]
    pub presence_updated_at: Option<DateTime<Utc>>,
    /// Origin of the last presence write.
    #[serde(default)]
    pub presence_source: Option<PresenceSource>,
    /// Profile fields.
    #[serde(default, flatten)]
    pub user_info: UserInfo,
}

impl ProfileMirror {
    /// An empty profile.
    pub fn empty() -> Self {
        Self {
            is_online: false,
            last_seen: None,
            presence_updated_at: None,
            presence_source: None,
            user_info: UserInfo::default(),
        }
    }

    /// Decode a raw store payload.
    pub fn from_value(value: serde_json::Value) -> AppResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| AppError::serialization(format!("Malformed profile: {e}")))
    }

    /// Apply a partial update. Any presence field bumps `presence_updated_at`.
    pub fn apply(&mut self, patch: &ProfilePatch, server_now: DateTime<Utc>) {
        let mut touched = false;
        if let Some(online) = patch.is_online {
            self.is_online = online;
            touched = true;
        }
        if let Some(stamp) = patch.last_seen {
            self.last_seen = Some(stamp.resolve(server_now));
            touched = true;
        }
        if let Some(source) = patch.presence_source {
            self.presence_source = Some(source);
        }
        if let Some(info) = &patch.user_info {
            self.user_info.merge(info);
        }
        if touched {
            self.presence_updated_at = Some(server_now);
        }
    }
}

/// A partial update to a [`ProfileMirror`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    /// New online flag.
    pub is_online: Option<bool>,
    /// New last-seen stamp.
    pub last_seen: Option<Stamp>,
    /// Origin of this write.
    pub presence_source: Option<PresenceSource>,
    /// Profile fields to merge.
    pub user_info: Option<UserInfo>,
}

impl ProfilePatch {
    /// The mirror write for an online/offline transition.
    pub fn presence(is_online: bool, source: PresenceSource) -> Self {
        Self {
            is_online: Some(is_online),
            last_seen: Some(Stamp::Server),
            presence_source: Some(source),
            user_info: None,
        }
    }

    /// A profile-only write.
    pub fn user_info(info: UserInfo) -> Self {
        Self {
            user_info: Some(info),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_presence_write_stamps_update_time() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut profile = ProfileMirror::empty();
        profile.apply(&ProfilePatch::presence(true, PresenceSource::Manual), now);

        assert!(profile.is_online);
        assert_eq!(profile.last_seen, Some(now));
        assert_eq!(profile.presence_updated_at, Some(now));
        assert_eq!(profile.presence_source, Some(PresenceSource::Manual));
    }

    #[test]
    fn test_user_info_write_leaves_presence_alone() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut profile = ProfileMirror::empty();
        profile.apply(
            &ProfilePatch::user_info(UserInfo {
                display_name: Some("Ann".into()),
                ..UserInfo::default()
            }),
            now,
        );
        assert!(profile.presence_updated_at.is_none());
        assert_eq!(profile.user_info.display_name.as_deref(), Some("Ann"));
    }
}

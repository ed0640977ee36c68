//! Ephemeral-store presence model.
//!
//! Payloads are typed at the adapter boundary: adapters hand the engine a
//! [`PresenceRecord`] or an error, never a loose map.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ConnectionId, UserKey};
use crate::error::AppError;
use crate::result::AppResult;

/// A timestamp carried by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stamp {
    /// Resolved by the store's own clock when the write is applied.
    Server,
    /// A client-supplied instant.
    At(DateTime<Utc>),
}

impl Stamp {
    /// Resolve against the applying store's clock.
    pub fn resolve(self, server_now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Server => server_now,
            Self::At(at) => at,
        }
    }
}

/// Profile fields mirrored alongside presence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Free-form status line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl UserInfo {
    /// Overlay every field set in `other`.
    pub fn merge(&mut self, other: &UserInfo) {
        if let Some(name) = &other.display_name {
            self.display_name = Some(name.clone());
        }
        if let Some(url) = &other.photo_url {
            self.photo_url = Some(url.clone());
        }
        if let Some(status) = &other.status_message {
            self.status_message = Some(status.clone());
        }
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.photo_url.is_none() && self.status_message.is_none()
    }
}

/// One physical client connection's liveness entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSession {
    /// Identifier minted when the connection was established.
    pub connection_id: ConnectionId,
    /// Whether the session is live.
    pub connected: bool,
    /// Last time this session was seen.
    pub last_seen: DateTime<Utc>,
    /// Description of the client device.
    pub device_info: String,
}

/// Per-user presence state in the ephemeral store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    /// Online flag as last written.
    pub online: bool,
    /// Last time the user was seen.
    pub last_seen: DateTime<Utc>,
    /// Last heartbeat, if the client has sent one.
    #[serde(default)]
    pub heartbeat: Option<DateTime<Utc>>,
    /// Live connection sessions.
    #[serde(default)]
    pub connections: BTreeMap<ConnectionId, ConnectionSession>,
    /// Connection that last claimed the record.
    #[serde(default)]
    pub active_connection_id: Option<ConnectionId>,
    /// Time of the last write.
    pub updated_at: DateTime<Utc>,
    /// Profile fields mirrored into the record.
    #[serde(default, flatten)]
    pub user_info: UserInfo,
}

impl PresenceRecord {
    /// An offline record with no sessions.
    pub fn offline(at: DateTime<Utc>) -> Self {
        Self {
            online: false,
            last_seen: at,
            heartbeat: None,
            connections: BTreeMap::new(),
            active_connection_id: None,
            updated_at: at,
            user_info: UserInfo::default(),
        }
    }

    /// Decode a raw store payload.
    pub fn from_value(value: serde_json::Value) -> AppResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| AppError::serialization(format!("Malformed presence record: {e}")))
    }

    /// Whether any connection session is registered.
    pub fn has_connections(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Apply a partial update, resolving server stamps against `server_now`.
    pub fn apply(&mut self, patch: &PresencePatch, server_now: DateTime<Utc>) {
        if let Some(online) = patch.online {
            self.online = online;
        }
        if let Some(stamp) = patch.last_seen {
            self.last_seen = stamp.resolve(server_now);
        }
        if let Some(stamp) = patch.heartbeat {
            self.heartbeat = Some(stamp.resolve(server_now));
        }
        if let Some(active) = &patch.active_connection_id {
            self.active_connection_id = active.clone();
        }
        if let Some(info) = &patch.user_info {
            self.user_info.merge(info);
        }
        self.updated_at = server_now;
    }
}

/// A partial update to a [`PresenceRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresencePatch {
    /// New online flag.
    pub online: Option<bool>,
    /// New last-seen stamp.
    pub last_seen: Option<Stamp>,
    /// New heartbeat stamp.
    pub heartbeat: Option<Stamp>,
    /// New active connection (`Some(None)` clears it).
    pub active_connection_id: Option<Option<ConnectionId>>,
    /// Profile fields to merge.
    pub user_info: Option<UserInfo>,
}

impl PresencePatch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the online flag.
    pub fn online(mut self, online: bool) -> Self {
        self.online = Some(online);
        self
    }

    /// Stamp `last_seen`.
    pub fn last_seen(mut self, stamp: Stamp) -> Self {
        self.last_seen = Some(stamp);
        self
    }

    /// Stamp `heartbeat`.
    pub fn heartbeat(mut self, stamp: Stamp) -> Self {
        self.heartbeat = Some(stamp);
        self
    }

    /// Set or clear the active connection.
    pub fn active_connection(mut self, id: Option<ConnectionId>) -> Self {
        self.active_connection_id = Some(id);
        self
    }

    /// Merge profile fields.
    pub fn user_info(mut self, info: UserInfo) -> Self {
        self.user_info = Some(info);
        self
    }

    /// The offline transition a disconnect cleanup applies.
    pub fn went_offline() -> Self {
        Self::new()
            .online(false)
            .last_seen(Stamp::Server)
            .active_connection(None)
    }
}

/// A location in the ephemeral store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PresencePath {
    /// `presence/{user}`
    Record(UserKey),
    /// `presence/{user}/connections/{connection}`
    Session(UserKey, ConnectionId),
}

impl PresencePath {
    /// The user the path belongs to.
    pub fn user(&self) -> &UserKey {
        match self {
            Self::Record(user) | Self::Session(user, _) => user,
        }
    }
}

impl fmt::Display for PresencePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record(user) => write!(f, "presence/{user}"),
            Self::Session(user, id) => write!(f, "presence/{user}/connections/{id}"),
        }
    }
}

/// Directive the store executes by itself once it sees the client's
/// transport drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupAction {
    /// Remove the session; when no sessions remain, mark the record offline.
    RemoveSession,
    /// Mark the record offline once no sessions remain.
    MarkOffline,
}

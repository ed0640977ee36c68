//! Identifier types for presence paths.
//!
//! [`UserKey`] is the key codec: arbitrary user identifiers (emails, phone
//! numbers, provider ids) are normalized into tokens that are safe to use as
//! a single segment of an ephemeral store path.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Segment for identifiers that are empty after trimming. No non-empty
/// identifier encodes to it: an escape is always `__` or `_` plus two
/// uppercase hex digits.
const EMPTY_KEY: &str = "_anonymous";

/// A path-safe, normalized user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserKey(String);

impl UserKey {
    /// Normalize a raw user identifier.
    ///
    /// Surrounding whitespace is trimmed. `[A-Za-z0-9-]` pass through, `_`
    /// becomes `__` and every other byte becomes `_XX` (uppercase hex), so
    /// distinct trimmed identifiers always get distinct keys.
    pub fn encode(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self(EMPTY_KEY.to_string());
        }

        let mut encoded = String::with_capacity(trimmed.len());
        for byte in trimmed.bytes() {
            match byte {
                b'_' => encoded.push_str("__"),
                b'-' => encoded.push('-'),
                b if b.is_ascii_alphanumeric() => encoded.push(char::from(b)),
                b => {
                    let _ = write!(encoded, "_{b:02X}");
                }
            }
        }
        Self(encoded)
    }

    /// The encoded segment.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserKey {
    fn from(raw: &str) -> Self {
        Self::encode(raw)
    }
}

/// Opaque identifier minted for each physical connection establishment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Mint a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap an identifier received from a store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

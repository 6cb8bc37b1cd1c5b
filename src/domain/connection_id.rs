//! Type-safe connection identity.
//!
//! [`ConnectionId`] wraps the opaque string a client presents at handshake
//! time. It keys the connection registry and the topic index, so keeping it
//! a distinct type prevents mixing identities up with topic names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Longest identity accepted from a client, in bytes.
pub const MAX_IDENTITY_LEN: usize = 256;

/// Identity of a connected client.
///
/// At most one live connection exists per identity at any time; a second
/// connect with the same identity replaces the first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a `ConnectionId`, rejecting empty, blank, or oversized input.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidRequest`] if the identity is empty after
    /// trimming or longer than [`MAX_IDENTITY_LEN`] bytes.
    pub fn parse(raw: impl Into<String>) -> Result<Self, RelayError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(RelayError::InvalidRequest(
                "connection identity must not be empty".to_string(),
            ));
        }
        if raw.len() > MAX_IDENTITY_LEN {
            return Err(RelayError::InvalidRequest(format!(
                "connection identity exceeds {MAX_IDENTITY_LEN} bytes"
            )));
        }
        Ok(Self(raw))
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<ConnectionId> for String {
    fn from(id: ConnectionId) -> Self {
        id.0
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_opaque_strings() {
        let Ok(id) = ConnectionId::parse("user-42") else {
            panic!("valid identity rejected");
        };
        assert_eq!(id.as_str(), "user-42");
        assert_eq!(id.to_string(), "user-42");
    }

    #[test]
    fn parse_rejects_blank() {
        assert!(ConnectionId::parse("").is_err());
        assert!(ConnectionId::parse("   ").is_err());
    }

    #[test]
    fn parse_rejects_oversized() {
        let long = "x".repeat(MAX_IDENTITY_LEN + 1);
        assert!(ConnectionId::parse(long).is_err());
    }

    #[test]
    fn serializes_transparently() {
        let id = ConnectionId::from("abc");
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"abc\"");
    }
}

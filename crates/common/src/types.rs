//! Common data types for Lockstep components.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identity a viewer announces in its `Hello`.
///
/// Opaque to the coordinator. Deserialization accepts any string so that an
/// empty id can be told apart from a broken message; use [`PeerId::parse`]
/// or [`PeerId::is_valid`] before trusting one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

/// Rejected peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("peer id must not be empty")]
pub struct InvalidPeerId;

impl PeerId {
    /// Build a peer id, rejecting empty and whitespace-only strings.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPeerId`] if the id has no visible characters.
    pub fn parse(id: impl Into<String>) -> Result<Self, InvalidPeerId> {
        let id = Self(id.into());
        if id.is_valid() {
            Ok(id)
        } else {
            Err(InvalidPeerId)
        }
    }

    /// Whether this id may be registered.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }

    /// Random id of the form `viewer-1a2b3c4d`.
    #[must_use]
    pub fn generate() -> Self {
        let mut suffix = Uuid::new_v4().simple().to_string();
        suffix.truncate(8);
        Self(format!("viewer-{suffix}"))
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned identifier of one physical connection.
///
/// A reconnecting viewer keeps its [`PeerId`] but always gets a fresh
/// `ConnectionId`, which lets late reports about a stale connection be
/// recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0.simple())
    }
}

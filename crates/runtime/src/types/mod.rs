//! Core identifiers shared across the journal, store, supervisor and sync modules.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::*;

/// Unique identifier assigned to a query submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryId(pub Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-issued identifier for a registered remote.
///
/// Until the `Hello` handshake completes, a remote is keyed by its connection
/// URL instead (see [`crate::remote::RemoteKey`]); once the server assigns a
/// `RemoteId` the sync service reconciles the two without duplicating status
/// entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteId(pub Uuid);

impl RemoteId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RemoteId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation session identifier; caller-supplied, opaque beyond equality.
pub type SessionId = String;

/// Caller-supplied artifact identifier, unique within a session.
pub type ArtifactId = String;

//! Error types for the execution core.

use thiserror::Error;

use super::QueryId;

/// Top-level error type returned by the execution core's public APIs.
#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("conflict resolution error: {0}")]
    Conflict(#[from] ConflictError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("key-value store error: {0}")]
    Kv(#[from] KvError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Journal append/replay/compaction errors.
#[derive(Error, Debug, Clone)]
pub enum JournalError {
    #[error("underlying key-value store failed: {0}")]
    Storage(#[from] KvError),

    #[error("failed to deserialize a persisted entry: {0}")]
    Corrupt(String),

    #[error("no compactor registered for event tag {0}")]
    NoCompactor(String),

    #[error("conflict resolution error: {0}")]
    Conflict(#[from] ConflictError),
}

/// Errors raised while reconciling entries sharing a primary key.
#[derive(Error, Debug, Clone)]
pub enum ConflictError {
    #[error("conflicting entries for primary key {primary_key} were rejected by policy")]
    Rejected { primary_key: String },

    #[error("merge function failed for primary key {primary_key}: {reason}")]
    MergeFailed { primary_key: String, reason: String },
}

/// Store projection errors (chat history, artifacts, session index).
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("conflict error: {0}")]
    Conflict(#[from] ConflictError),

    #[error("sequence gap for session {session_id}: expected {expected}, got {actual}")]
    SequenceGap {
        session_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("artifact not found: session {session_id}, id {artifact_id}")]
    ArtifactNotFound {
        session_id: String,
        artifact_id: String,
    },

    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },
}

/// Errors surfaced by the remote protocol client and sync service.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("transport error talking to remote {remote}: {reason}")]
    Transport { remote: String, reason: String },

    #[error("protocol violation from remote {remote}: {reason}")]
    Protocol { remote: String, reason: String },

    #[error("remote {0} is not registered")]
    UnknownRemote(String),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync service is shutting down")]
    ShuttingDown,
}

/// Query supervisor admission/lifecycle errors.
#[derive(Error, Debug, Clone)]
pub enum SupervisorError {
    #[error("prompt failed validation: {reason}")]
    InvalidPrompt { reason: String },

    #[error("session id {session_id} failed validation: {reason}")]
    InvalidSessionId { session_id: String, reason: String },

    #[error("pending queue is full (capacity {capacity}, strategy {strategy})")]
    QueueFull { capacity: usize, strategy: String },

    #[error("query {query_id} timed out waiting in the pending queue after {timeout_ms}ms")]
    PendingTimeout { query_id: QueryId, timeout_ms: u64 },

    #[error("query {0} was not found among active or pending queries")]
    UnknownQuery(QueryId),

    #[error("query {0} was cancelled while still pending admission")]
    PendingCancelled(QueryId),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("supervisor is shutting down")]
    ShuttingDown,
}

/// Errors surfaced by the external agent backend contract.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("agent backend failed to start: {0}")]
    StartFailed(String),

    #[error("operation not supported by this backend: {0}")]
    NotSupported(String),
}

/// Errors from the `KeyValueStore` contract.
#[derive(Error, Debug, Clone)]
pub enum KvError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

/// Configuration validation errors.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Result alias used throughout the crate's public APIs.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

//! Prelude for applications embedding the execution core.
//!
//! Import everything a typical embedder needs with a single line:
//!
//! ```ignore
//! use loomcore_runtime::prelude::*;
//! ```

// Facade
pub use crate::ExecutionCore;

// Configuration
pub use crate::config::RuntimeConfig;

// Journal
pub use crate::journal::{ConflictPolicy, Entry, EntryId, Journal, LastWriteWins};

// Store projections
pub use crate::store::{ArtifactRecord, ArtifactStore, ChatEvent, ChatHistoryStore, SessionIndex, SessionMeta};

// Query supervisor
pub use crate::supervisor::{
    ActiveQueryHandle, QueryBackend, QueryHandle, QueryOptions, QuerySupervisor, SupervisorConfig,
    SupervisorEvent,
};

// Remote sync
pub use crate::sync::{Connector, RemoteStatus, SyncService};

// Persistence contract
pub use crate::kv::{KeyValueStore, MemoryKvStore};

// Identifiers and errors
pub use crate::types::{QueryId, RemoteId, RuntimeError, RuntimeResult, SessionId};

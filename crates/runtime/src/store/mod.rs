//! Store projections derived from recorded activity: chat history and
//! artifacts, plus the session index both share.

pub mod artifact;
pub mod chat_history;
pub mod session_index;

pub use artifact::{ArtifactRecord, ArtifactRetention, ArtifactStore};
pub use chat_history::{ChatEvent, ChatEventSource, ChatHistoryStore, ChatRetention};
pub use session_index::{SessionIndex, SessionMeta};

//! The external agent backend contract consumed by the query supervisor.
//!
//! The supervisor never talks to a model provider directly; it delegates
//! admitted queries to whatever [`QueryBackend`] the embedding application
//! wires in, and only ever sees the resulting [`QueryHandle`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::types::BackendError;

/// Free-form parameters forwarded to the backend unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    pub session_id: Option<String>,
    pub params: serde_json::Value,
}

/// One message emitted on a query's output stream. Payload shape is owned by
/// the backend; the execution core only needs it to be cloneable JSON so it
/// can be journaled by the chat history recorder.
pub type QueryMessage = serde_json::Value;

/// A running query. Dropped once the supervisor's scope finaliser has
/// recorded completion; backends should treat `interrupt` as idempotent.
#[async_trait]
pub trait QueryHandle: Send + Sync {
    /// The (possibly still-open) output stream.
    fn messages(&self) -> BoxStream<'static, QueryMessage>;

    /// Signals that no further user input will arrive.
    async fn close_input(&self);

    /// Requests the backend stop as soon as possible.
    async fn interrupt(&self);

    /// Switches the permission mode for the remainder of the query.
    async fn set_permission_mode(&self, _mode: &str) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("set_permission_mode".to_string()))
    }

    /// Switches the underlying model for the remainder of the query.
    async fn set_model(&self, _model: &str) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("set_model".to_string()))
    }

    async fn set_max_thinking_tokens(&self, _tokens: u32) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("set_max_thinking_tokens".to_string()))
    }

    async fn rewind_files(&self, _to: &str) -> Result<(), BackendError> {
        Err(BackendError::NotSupported("rewind_files".to_string()))
    }

    async fn supported_commands(&self) -> Result<Vec<String>, BackendError> {
        Err(BackendError::NotSupported("supported_commands".to_string()))
    }

    async fn supported_models(&self) -> Result<Vec<String>, BackendError> {
        Err(BackendError::NotSupported("supported_models".to_string()))
    }
}

/// Starts agent queries. Implementations own the actual model/agent process
/// or RPC; the supervisor only ever calls `start` under an admission slot.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn start(
        &self,
        prompt: String,
        options: QueryOptions,
    ) -> Result<std::sync::Arc<dyn QueryHandle>, BackendError>;
}

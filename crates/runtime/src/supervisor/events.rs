//! Multicast event bus for query lifecycle transitions.

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::types::QueryId;

/// Status attached to a `QueryCompleted` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOutcome {
    Success,
    Failure,
    Interrupted,
}

/// One of the four lifecycle transitions the supervisor publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SupervisorEvent {
    QueryQueued {
        query_id: QueryId,
        timestamp_ms: u64,
    },
    QueryStarted {
        query_id: QueryId,
        timestamp_ms: u64,
    },
    QueryCompleted {
        query_id: QueryId,
        status: QueryOutcome,
        timestamp_ms: u64,
    },
    QueryStartFailed {
        query_id: QueryId,
        error_tag: Option<String>,
        timestamp_ms: u64,
    },
}

/// Thin wrapper over a broadcast channel; when `enabled` is false, publishing
/// is a no-op and every subscriber sees an immediately-empty stream.
pub struct EventBus {
    sender: Option<broadcast::Sender<SupervisorEvent>>,
}

impl EventBus {
    pub fn new(enabled: bool, capacity: usize) -> Self {
        if !enabled {
            return Self { sender: None };
        }
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender: Some(sender) }
    }

    pub fn publish(&self, event: SupervisorEvent) {
        if let Some(sender) = &self.sender {
            // No subscribers is not an error; the event is simply dropped.
            let _ = sender.send(event);
        }
    }

    /// A multicast stream of future events. Lagging subscribers silently skip
    /// the events they missed rather than erroring the stream.
    pub fn subscribe(&self) -> BoxStream<'static, SupervisorEvent> {
        match &self.sender {
            Some(sender) => Box::pin(
                BroadcastStream::new(sender.subscribe()).filter_map(|item| item.ok()),
            ),
            None => Box::pin(futures::stream::empty()),
        }
    }
}

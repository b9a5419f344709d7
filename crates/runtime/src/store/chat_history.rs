//! Per-session chat event log with dense, strictly-increasing sequences.

use bytes::Bytes;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::kv::KeyValueStore;
use crate::store::session_index::SessionIndex;
use crate::types::{KvError, StoreError};

fn meta_key(session_id: &str) -> String {
    format!("chat-history/{session_id}/meta")
}

fn event_key(session_id: &str, sequence: u64) -> String {
    format!("chat-history/{session_id}/event/{sequence}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatEventSource {
    Sdk,
    User,
    System,
}

/// One recorded chat message. Primary key: `sessionId:sequence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub session_id: String,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub source: ChatEventSource,
    pub message: serde_json::Value,
}

impl ChatEvent {
    pub fn primary_key(&self) -> String {
        format!("{}:{}", self.session_id, self.sequence)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChatMeta {
    last_sequence: u64,
}

/// Per-session retention: drop the oldest events beyond `max_events` or
/// older than `max_age_ms`.
#[derive(Debug, Clone, Default)]
pub struct ChatRetention {
    pub max_events: Option<usize>,
    pub max_age_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub start_sequence: Option<u64>,
    pub end_sequence: Option<u64>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

pub struct ChatHistoryStore<S> {
    kv: Arc<S>,
    session_index: Arc<SessionIndex<S>>,
    retention: ChatRetention,
    default_limit: usize,
}

impl<S: KeyValueStore> ChatHistoryStore<S> {
    pub fn new(
        kv: Arc<S>,
        session_index: Arc<SessionIndex<S>>,
        retention: ChatRetention,
        default_limit: usize,
    ) -> Self {
        Self {
            kv,
            session_index,
            retention,
            default_limit,
        }
    }

    async fn read_meta(&self, session_id: &str) -> Result<ChatMeta, StoreError> {
        match self.kv.get(&meta_key(session_id)).await.map_err(to_store_error)? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| to_store_error(KvError::Serialization(e.to_string())))
            }
            None => Ok(ChatMeta::default()),
        }
    }

    async fn write_meta(&self, session_id: &str, meta: &ChatMeta) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(meta).map_err(|e| to_store_error(KvError::Serialization(e.to_string())))?;
        self.kv
            .set(&meta_key(session_id), Bytes::from(bytes))
            .await
            .map_err(to_store_error)
    }

    /// Assigns the next sequence for the session and persists the event and
    /// updated meta record.
    pub async fn append_message(
        &self,
        session_id: &str,
        message: serde_json::Value,
        source: ChatEventSource,
        now_millis: u64,
    ) -> Result<ChatEvent, StoreError> {
        let mut meta = self.read_meta(session_id).await?;
        let sequence = meta.last_sequence + 1;
        let event = ChatEvent {
            session_id: session_id.to_string(),
            sequence,
            timestamp_ms: now_millis,
            source,
            message,
        };

        let bytes = serde_json::to_vec(&event).map_err(|e| to_store_error(KvError::Serialization(e.to_string())))?;
        self.kv
            .set(&event_key(session_id, sequence), Bytes::from(bytes))
            .await
            .map_err(to_store_error)?;

        meta.last_sequence = sequence;
        self.write_meta(session_id, &meta).await?;
        self.session_index
            .touch(session_id, now_millis)
            .await
            .map_err(to_store_error)?;

        Ok(event)
    }

    pub async fn append_messages(
        &self,
        session_id: &str,
        messages: Vec<(serde_json::Value, ChatEventSource)>,
        now_millis: u64,
    ) -> Result<Vec<ChatEvent>, StoreError> {
        let mut events = Vec::with_capacity(messages.len());
        for (message, source) in messages {
            events.push(
                self.append_message(session_id, message, source, now_millis)
                    .await?,
            );
        }
        Ok(events)
    }

    /// Returns the contiguous slice of events in `[start, end]`, clamped to
    /// `[1, lastSequence]`, honouring `reverse` and a default limit.
    pub async fn list(&self, session_id: &str, opts: ListOptions) -> Result<Vec<ChatEvent>, StoreError> {
        let meta = self.read_meta(session_id).await?;
        if meta.last_sequence == 0 {
            return Ok(Vec::new());
        }

        let start = opts.start_sequence.unwrap_or(1).max(1);
        let end = opts.end_sequence.unwrap_or(meta.last_sequence).min(meta.last_sequence);
        if start > end {
            return Ok(Vec::new());
        }

        let limit = opts.limit.unwrap_or(self.default_limit);
        let mut sequences: Vec<u64> = (start..=end).collect();
        if sequences.len() > limit {
            if opts.reverse {
                sequences = sequences.split_off(sequences.len() - limit);
            } else {
                sequences.truncate(limit);
            }
        }
        if opts.reverse {
            sequences.reverse();
        }

        let mut events = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            if let Some(bytes) = self
                .kv
                .get(&event_key(session_id, sequence))
                .await
                .map_err(to_store_error)?
            {
                let event: ChatEvent =
                    serde_json::from_slice(&bytes).map_err(|e| to_store_error(KvError::Serialization(e.to_string())))?;
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Lazy variant of [`ChatHistoryStore::list`].
    pub async fn stream(&self, session_id: &str, opts: ListOptions) -> Result<BoxStream<'static, ChatEvent>, StoreError> {
        let events = self.list(session_id, opts).await?;
        Ok(Box::pin(stream::iter(events)))
    }

    /// Removes all events and the meta record for a session.
    pub async fn purge(&self, session_id: &str) -> Result<(), StoreError> {
        let meta = self.read_meta(session_id).await?;
        for sequence in 1..=meta.last_sequence {
            self.kv
                .remove(&event_key(session_id, sequence))
                .await
                .map_err(to_store_error)?;
        }
        self.kv.remove(&meta_key(session_id)).await.map_err(to_store_error)?;
        self.session_index.remove(session_id).await.map_err(to_store_error)?;
        Ok(())
    }

    /// Applies retention across every known session, removing the oldest
    /// violators and updating `lastSequence` to the highest retained one.
    pub async fn cleanup(&self, now_millis: u64) -> Result<usize, StoreError> {
        let mut removed_total = 0usize;
        let sessions = self.session_index.known_sessions().await.map_err(to_store_error)?;

        for session_id in sessions {
            let meta = self.read_meta(&session_id).await?;
            if meta.last_sequence == 0 {
                continue;
            }

            let mut events = Vec::new();
            for sequence in 1..=meta.last_sequence {
                if let Some(bytes) = self
                    .kv
                    .get(&event_key(&session_id, sequence))
                    .await
                    .map_err(to_store_error)?
                {
                    let event: ChatEvent = serde_json::from_slice(&bytes)
                        .map_err(|e| to_store_error(KvError::Serialization(e.to_string())))?;
                    events.push(event);
                }
            }

            let mut retained = events;
            if let Some(max_age_ms) = self.retention.max_age_ms {
                let cutoff = now_millis.saturating_sub(max_age_ms);
                retained.retain(|e| e.timestamp_ms >= cutoff);
            }
            if let Some(max_events) = self.retention.max_events {
                if retained.len() > max_events {
                    let skip = retained.len() - max_events;
                    retained = retained.split_off(skip);
                }
            }

            let retained_sequences: std::collections::HashSet<u64> =
                retained.iter().map(|e| e.sequence).collect();
            for sequence in 1..=meta.last_sequence {
                if !retained_sequences.contains(&sequence) {
                    self.kv
                        .remove(&event_key(&session_id, sequence))
                        .await
                        .map_err(to_store_error)?;
                    removed_total += 1;
                }
            }

            let new_last = retained.iter().map(|e| e.sequence).max().unwrap_or(0);
            self.write_meta(&session_id, &ChatMeta { last_sequence: new_last })
                .await?;
        }

        Ok(removed_total)
    }
}

fn to_store_error(e: KvError) -> StoreError {
    StoreError::Journal(crate::types::JournalError::Storage(e))
}

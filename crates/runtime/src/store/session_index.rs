//! Tracks which sessions have recorded activity, for cleanup sweeps.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::kv::KeyValueStore;
use crate::types::KvError;

const INDEX_KEY: &str = "session-index/sessions";

fn meta_key(session_id: &str) -> String {
    format!("session-index/meta/{session_id}")
}

/// `{sessionId, createdAt, updatedAt}`, mutated whenever any store records
/// activity for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Registry of known session ids, backed by a sorted set persisted as a
/// single JSON document plus one meta record per session.
pub struct SessionIndex<S> {
    kv: std::sync::Arc<S>,
}

impl<S: KeyValueStore> SessionIndex<S> {
    pub fn new(kv: std::sync::Arc<S>) -> Self {
        Self { kv }
    }

    async fn load_set(&self) -> Result<BTreeSet<String>, KvError> {
        match self.kv.get(INDEX_KEY).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| KvError::Serialization(e.to_string())),
            None => Ok(BTreeSet::new()),
        }
    }

    async fn save_set(&self, set: &BTreeSet<String>) -> Result<(), KvError> {
        let bytes = serde_json::to_vec(set).map_err(|e| KvError::Serialization(e.to_string()))?;
        self.kv.set(INDEX_KEY, Bytes::from(bytes)).await
    }

    /// Records (or refreshes) activity for a session, creating its meta
    /// record on first touch.
    pub async fn touch(&self, session_id: &str, now_millis: u64) -> Result<(), KvError> {
        let mut set = self.load_set().await?;
        let is_new = set.insert(session_id.to_string());
        if is_new {
            self.save_set(&set).await?;
        }

        let meta = match self.kv.get(&meta_key(session_id)).await? {
            Some(bytes) => {
                let mut meta: SessionMeta = serde_json::from_slice(&bytes)
                    .map_err(|e| KvError::Serialization(e.to_string()))?;
                meta.updated_at = now_millis;
                meta
            }
            None => SessionMeta {
                session_id: session_id.to_string(),
                created_at: now_millis,
                updated_at: now_millis,
            },
        };

        let bytes = serde_json::to_vec(&meta).map_err(|e| KvError::Serialization(e.to_string()))?;
        self.kv.set(&meta_key(session_id), Bytes::from(bytes)).await
    }

    pub async fn meta(&self, session_id: &str) -> Result<Option<SessionMeta>, KvError> {
        match self.kv.get(&meta_key(session_id)).await? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| KvError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Removes a session entirely, e.g. after a purge.
    pub async fn remove(&self, session_id: &str) -> Result<(), KvError> {
        let mut set = self.load_set().await?;
        if set.remove(session_id) {
            self.save_set(&set).await?;
        }
        self.kv.remove(&meta_key(session_id)).await
    }

    pub async fn known_sessions(&self) -> Result<Vec<String>, KvError> {
        Ok(self.load_set().await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn touch_creates_meta_on_first_call_and_updates_after() {
        let index = SessionIndex::new(Arc::new(MemoryKvStore::new()));
        index.touch("s:1", 100).await.unwrap();
        let meta = index.meta("s:1").await.unwrap().unwrap();
        assert_eq!(meta.created_at, 100);
        assert_eq!(meta.updated_at, 100);

        index.touch("s:1", 200).await.unwrap();
        let meta = index.meta("s:1").await.unwrap().unwrap();
        assert_eq!(meta.created_at, 100);
        assert_eq!(meta.updated_at, 200);
    }

    #[tokio::test]
    async fn known_sessions_lists_every_touched_session_once() {
        let index = SessionIndex::new(Arc::new(MemoryKvStore::new()));
        index.touch("s:2", 0).await.unwrap();
        index.touch("s:1", 0).await.unwrap();
        index.touch("s:2", 5).await.unwrap();
        assert_eq!(index.known_sessions().await.unwrap(), vec!["s:1", "s:2"]);
    }

    #[tokio::test]
    async fn remove_drops_session_from_index_and_meta() {
        let index = SessionIndex::new(Arc::new(MemoryKvStore::new()));
        index.touch("s:1", 0).await.unwrap();
        index.remove("s:1").await.unwrap();
        assert!(index.known_sessions().await.unwrap().is_empty());
        assert!(index.meta("s:1").await.unwrap().is_none());
    }
}

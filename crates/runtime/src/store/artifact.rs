//! Session-scoped artifact storage with insertion-ordered indexing and
//! tombstoned deletion.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::kv::KeyValueStore;
use crate::store::session_index::SessionIndex;
use crate::types::{KvError, StoreError};

fn by_id_key(id: &str) -> String {
    format!("artifacts/by-id/{id}")
}

fn by_session_key(session_id: &str) -> String {
    format!("artifacts/by-session/{session_id}")
}

/// Primary key: `sessionId:id`. A deleted artifact keeps its record with
/// `deleted_at` set rather than being physically removed, so replicas that
/// restore it converge deterministically via the conflict policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub session_id: String,
    pub kind: String,
    pub encoding: String,
    pub content: Bytes,
    pub created_at: u64,
    pub size_bytes: Option<u64>,
    pub deleted_at: Option<u64>,
}

impl ArtifactRecord {
    pub fn primary_key(&self) -> String {
        format!("{}:{}", self.session_id, self.id)
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArtifactRetention {
    pub max_artifacts: Option<usize>,
    pub max_artifact_bytes: Option<u64>,
    pub max_age_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

pub struct ArtifactStore<S> {
    kv: Arc<S>,
    session_index: Arc<SessionIndex<S>>,
    retention: ArtifactRetention,
}

impl<S: KeyValueStore> ArtifactStore<S> {
    pub fn new(kv: Arc<S>, session_index: Arc<SessionIndex<S>>, retention: ArtifactRetention) -> Self {
        Self {
            kv,
            session_index,
            retention,
        }
    }

    async fn session_id_list(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        match self.kv.get(&by_session_key(session_id)).await.map_err(to_store_error)? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| to_store_error(KvError::Serialization(e.to_string())))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn write_session_id_list(&self, session_id: &str, ids: &[String]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(ids).map_err(|e| to_store_error(KvError::Serialization(e.to_string())))?;
        self.kv
            .set(&by_session_key(session_id), Bytes::from(bytes))
            .await
            .map_err(to_store_error)
    }

    /// Writes the record, appends it to the session's id index, then
    /// applies retention newest-first, evicting violators.
    pub async fn put(&self, record: ArtifactRecord) -> Result<(), StoreError> {
        let session_id = record.session_id.clone();
        let id = record.id.clone();
        let now = record.created_at;

        let bytes = serde_json::to_vec(&record).map_err(|e| to_store_error(KvError::Serialization(e.to_string())))?;
        self.kv.set(&by_id_key(&id), Bytes::from(bytes)).await.map_err(to_store_error)?;

        let mut ids = self.session_id_list(&session_id).await?;
        if !ids.contains(&id) {
            ids.push(id);
            self.write_session_id_list(&session_id, &ids).await?;
        }
        self.session_index.touch(&session_id, now).await.map_err(to_store_error)?;

        self.apply_retention(&session_id, now).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ArtifactRecord>, StoreError> {
        match self.kv.get(&by_id_key(id)).await.map_err(to_store_error)? {
            Some(bytes) => {
                let record: ArtifactRecord =
                    serde_json::from_slice(&bytes).map_err(|e| to_store_error(KvError::Serialization(e.to_string())))?;
                if record.is_tombstone() {
                    Ok(None)
                } else {
                    Ok(Some(record))
                }
            }
            None => Ok(None),
        }
    }

    /// Records in insertion order, skipping tombstones. Stale index entries
    /// (id present, record missing) are self-repaired with a warning.
    pub async fn list(&self, session_id: &str, opts: ListOptions) -> Result<Vec<ArtifactRecord>, StoreError> {
        let ids = self.session_id_list(session_id).await?;
        let mut records = Vec::new();
        let mut repaired = Vec::new();
        let mut dirty = false;

        for id in &ids {
            match self.kv.get(&by_id_key(id)).await.map_err(to_store_error)? {
                Some(bytes) => {
                    let record: ArtifactRecord = serde_json::from_slice(&bytes)
                        .map_err(|e| to_store_error(KvError::Serialization(e.to_string())))?;
                    repaired.push(id.clone());
                    if !record.is_tombstone() {
                        records.push(record);
                    }
                }
                None => {
                    tracing::warn!(session_id, id, "dropping dangling artifact index entry");
                    dirty = true;
                }
            }
        }
        if dirty {
            self.write_session_id_list(session_id, &repaired).await?;
        }

        let offset = opts.offset.unwrap_or(0);
        let records: Vec<_> = records.into_iter().skip(offset).collect();
        Ok(match opts.limit {
            Some(limit) => records.into_iter().take(limit).collect(),
            None => records,
        })
    }

    /// Writes a tombstone in place of the record rather than removing it.
    pub async fn delete(&self, id: &str, now_millis: u64) -> Result<(), StoreError> {
        if let Some(mut record) = self.get(id).await? {
            record.deleted_at = Some(now_millis);
            record.content = Bytes::new();
            let bytes =
                serde_json::to_vec(&record).map_err(|e| to_store_error(KvError::Serialization(e.to_string())))?;
            self.kv.set(&by_id_key(id), Bytes::from(bytes)).await.map_err(to_store_error)?;
        }
        Ok(())
    }

    pub async fn purge_session(&self, session_id: &str) -> Result<(), StoreError> {
        let ids = self.session_id_list(session_id).await?;
        for id in ids {
            self.kv.remove(&by_id_key(&id)).await.map_err(to_store_error)?;
        }
        self.kv.remove(&by_session_key(session_id)).await.map_err(to_store_error)?;
        self.session_index.remove(session_id).await.map_err(to_store_error)?;
        Ok(())
    }

    async fn apply_retention(&self, session_id: &str, now_millis: u64) -> Result<(), StoreError> {
        let ids = self.session_id_list(session_id).await?;
        let mut records = Vec::new();
        for id in &ids {
            if let Some(bytes) = self.kv.get(&by_id_key(id)).await.map_err(to_store_error)? {
                let record: ArtifactRecord = serde_json::from_slice(&bytes)
                    .map_err(|e| to_store_error(KvError::Serialization(e.to_string())))?;
                if !record.is_tombstone() {
                    records.push(record);
                }
            }
        }

        if let Some(max_age_ms) = self.retention.max_age_ms {
            let cutoff = now_millis.saturating_sub(max_age_ms);
            let evicted: Vec<_> = records.iter().filter(|r| r.created_at < cutoff).cloned().collect();
            for r in evicted {
                self.delete(&r.id, now_millis).await?;
            }
            records.retain(|r| r.created_at >= cutoff);
        }

        if let Some(max_bytes) = self.retention.max_artifact_bytes {
            let mut total = 0u64;
            let mut evict_ids = std::collections::HashSet::new();
            for r in records.iter().rev() {
                let size = r.size_bytes.unwrap_or(r.content.len() as u64);
                if total + size > max_bytes {
                    evict_ids.insert(r.id.clone());
                } else {
                    total += size;
                }
            }
            for id in &evict_ids {
                self.delete(id, now_millis).await?;
            }
            records.retain(|r| !evict_ids.contains(&r.id));
        }

        if let Some(max_artifacts) = self.retention.max_artifacts {
            if records.len() > max_artifacts {
                let skip = records.len() - max_artifacts;
                for r in &records[..skip] {
                    self.delete(&r.id, now_millis).await?;
                }
            }
        }

        Ok(())
    }
}

fn to_store_error(e: KvError) -> StoreError {
    StoreError::Journal(crate::types::JournalError::Storage(e))
}

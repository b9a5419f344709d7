//! The persistent key-value contract consumed by the journal and store layers.
//!
//! The execution core never assumes multi-key transactions; compensation for
//! partial writes is handled explicitly by the journal (see
//! [`crate::journal::Journal::append`]).

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::types::KvError;

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct KvPage {
    pub keys: Vec<String>,
    pub next_cursor: Option<String>,
}

/// Persistent key-value contract.
///
/// Implementations are expected to be concurrency-safe for independent keys
/// and may rate-limit per-key write throughput; callers that need write
/// coalescing should wrap a store in [`CoalescingKvStore`].
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError>;
    async fn set(&self, key: &str, value: Bytes) -> Result<(), KvError>;
    async fn remove(&self, key: &str) -> Result<(), KvError>;
    async fn has(&self, key: &str) -> Result<bool, KvError>;
    async fn list(
        &self,
        prefix: Option<&str>,
        cursor: Option<String>,
        limit: Option<usize>,
    ) -> Result<KvPage, KvError>;
    async fn is_empty(&self) -> Result<bool, KvError>;
    async fn size(&self) -> Result<usize, KvError>;
}

/// Reference in-memory implementation; backs all crate tests and doctests.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Bytes>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), KvError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.entries.contains_key(key))
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        cursor: Option<String>,
        limit: Option<usize>,
    ) -> Result<KvPage, KvError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| prefix.map(|p| k.starts_with(p)).unwrap_or(true))
            .collect();
        keys.sort();

        let start = match cursor {
            Some(after) => keys.partition_point(|k| k <= &after),
            None => 0,
        };

        let remaining = &keys[start..];
        match limit {
            Some(limit) if remaining.len() > limit => {
                let page = remaining[..limit].to_vec();
                let next_cursor = page.last().cloned();
                Ok(KvPage {
                    keys: page,
                    next_cursor,
                })
            }
            _ => Ok(KvPage {
                keys: remaining.to_vec(),
                next_cursor: None,
            }),
        }
    }

    async fn is_empty(&self) -> Result<bool, KvError> {
        Ok(self.entries.is_empty())
    }

    async fn size(&self) -> Result<usize, KvError> {
        Ok(self.entries.len())
    }
}

/// Decorator that buffers writes per key and flushes in FIFO order,
/// preserving last-writer-wins semantics — for backends rate-limited to
/// roughly one write per second per key.
pub struct CoalescingKvStore<S> {
    inner: Arc<S>,
    min_interval: Duration,
    pending: DashMap<String, Bytes>,
    last_flush: Mutex<std::collections::HashMap<String, Instant>>,
}

impl<S: KeyValueStore> CoalescingKvStore<S> {
    pub fn new(inner: Arc<S>, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            pending: DashMap::new(),
            last_flush: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Flush a single key immediately, bypassing the coalescing window.
    pub async fn flush(&self, key: &str) -> Result<(), KvError> {
        if let Some((_, value)) = self.pending.remove(key) {
            self.inner.set(key, value).await?;
            self.last_flush
                .lock()
                .await
                .insert(key.to_string(), Instant::now());
        }
        Ok(())
    }

    /// Flush every key with a pending write.
    pub async fn flush_all(&self) -> Result<(), KvError> {
        let keys: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.flush(&key).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for CoalescingKvStore<S> {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        if let Some(pending) = self.pending.get(key) {
            return Ok(Some(pending.value().clone()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), KvError> {
        let due = {
            let last_flush = self.last_flush.lock().await;
            match last_flush.get(key) {
                Some(at) => at.elapsed() >= self.min_interval,
                None => true,
            }
        };

        if due {
            self.inner.set(key, value).await?;
            self.last_flush
                .lock()
                .await
                .insert(key.to_string(), Instant::now());
            self.pending.remove(key);
        } else {
            self.pending.insert(key.to_string(), value);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), KvError> {
        self.pending.remove(key);
        self.inner.remove(key).await
    }

    async fn has(&self, key: &str) -> Result<bool, KvError> {
        if self.pending.contains_key(key) {
            return Ok(true);
        }
        self.inner.has(key).await
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        cursor: Option<String>,
        limit: Option<usize>,
    ) -> Result<KvPage, KvError> {
        self.flush_all().await?;
        self.inner.list(prefix, cursor, limit).await
    }

    async fn is_empty(&self) -> Result<bool, KvError> {
        if !self.pending.is_empty() {
            return Ok(false);
        }
        self.inner.is_empty().await
    }

    async fn size(&self) -> Result<usize, KvError> {
        self.flush_all().await?;
        self.inner.size().await
    }
}

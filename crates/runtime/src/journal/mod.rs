//! Append-only journal: ordered entries, a primary-key index, conflict
//! resolution on write, and registered compaction over event tags.

pub mod compaction;
pub mod conflict;
pub mod entry;

pub use compaction::{ByAge, ByCount, BySize, CompactionStrategy, Composite};
pub use conflict::{ConflictDecision, ConflictPolicy, FirstWriteWins, LastWriteWins, Merge, Reject};
pub use entry::{Entry, EntryId, IdAllocator};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::kv::KeyValueStore;
use crate::types::JournalError;

impl EntryId {
    /// The id immediately following this one.
    pub fn next(&self) -> EntryId {
        EntryId(self.0 + 1)
    }
}

/// Per-remote bookkeeping: how far the remote has been caught up (pull
/// direction) and how far it has acknowledged our local writes (push
/// direction).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteCursor {
    pub next_sequence: Option<EntryId>,
    pub committed_up_to: Option<EntryId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedJournal {
    entries: Vec<Entry>,
    primary_key_index: HashMap<String, EntryId>,
    remotes: HashMap<String, RemoteCursor>,
}

struct JournalState {
    entries: BTreeMap<EntryId, Entry>,
    primary_key_index: HashMap<String, EntryId>,
    remotes: HashMap<String, RemoteCursor>,
}

/// Append-only log of tagged entries with per-entry primary key and total
/// order, backed by a [`KeyValueStore`].
pub struct Journal<S: KeyValueStore> {
    kv: Arc<S>,
    namespace: String,
    state: RwLock<JournalState>,
    allocator: IdAllocator,
    conflict_policy: Arc<dyn ConflictPolicy>,
    compactors: RwLock<Vec<(HashSet<String>, Arc<dyn CompactionStrategy>)>>,
}

impl<S: KeyValueStore> Journal<S> {
    fn journal_key(namespace: &str) -> String {
        format!("{}/event-journal", namespace)
    }

    fn identity_key(namespace: &str) -> String {
        format!("{}/event-log-identity", namespace)
    }

    /// Open a journal over `kv`, replaying any previously persisted state.
    pub async fn open(
        kv: Arc<S>,
        namespace: impl Into<String>,
        conflict_policy: Arc<dyn ConflictPolicy>,
    ) -> Result<Self, JournalError> {
        let namespace = namespace.into();
        let allocator = IdAllocator::new();

        let persisted = match kv.get(&Self::journal_key(&namespace)).await? {
            Some(bytes) => serde_json::from_slice::<PersistedJournal>(&bytes)
                .map_err(|e| JournalError::Corrupt(e.to_string()))?,
            None => PersistedJournal::default(),
        };

        if let Some(bytes) = kv.get(&Self::identity_key(&namespace)).await? {
            let last: EntryId = serde_json::from_slice(&bytes)
                .map_err(|e| JournalError::Corrupt(e.to_string()))?;
            allocator.resume_after(last);
        } else if let Some(max_id) = persisted.entries.iter().map(|e| e.id).max() {
            allocator.resume_after(max_id);
        }

        let state = JournalState {
            entries: persisted.entries.into_iter().map(|e| (e.id, e)).collect(),
            primary_key_index: persisted.primary_key_index,
            remotes: persisted.remotes,
        };

        Ok(Self {
            kv,
            namespace,
            state: RwLock::new(state),
            allocator,
            conflict_policy,
            compactors: RwLock::new(Vec::new()),
        })
    }

    async fn persist(&self, state: &JournalState) -> Result<(), JournalError> {
        let snapshot = PersistedJournal {
            entries: state.entries.values().cloned().collect(),
            primary_key_index: state.primary_key_index.clone(),
            remotes: state.remotes.clone(),
        };
        let bytes = serde_json::to_vec(&snapshot).map_err(|e| JournalError::Corrupt(e.to_string()))?;
        self.kv
            .set(&Self::journal_key(&self.namespace), Bytes::from(bytes))
            .await
            .map_err(JournalError::Storage)?;

        if let Some(max_id) = state.entries.keys().next_back() {
            let bytes =
                serde_json::to_vec(max_id).map_err(|e| JournalError::Corrupt(e.to_string()))?;
            self.kv
                .set(&Self::identity_key(&self.namespace), Bytes::from(bytes))
                .await
                .map_err(JournalError::Storage)?;
        }
        Ok(())
    }

    /// Allocate a new id strictly greater than all prior ids, update the
    /// primary-key index, persist, and return the created entry.
    ///
    /// On a persistence failure after the index update, the update is rolled
    /// back and the error is surfaced so no dangling index entry is left
    /// pointing at an unpersisted payload.
    #[tracing::instrument(skip(self, payload))]
    pub async fn append(
        &self,
        event: impl Into<String>,
        primary_key: impl Into<String>,
        payload: Bytes,
    ) -> Result<Entry, JournalError> {
        let entry = Entry {
            id: self.allocator.allocate(),
            event: event.into(),
            primary_key: primary_key.into(),
            payload,
        };

        let mut state = self.state.write().await;
        let previous_index_entry = state
            .primary_key_index
            .insert(entry.primary_key.clone(), entry.id);
        state.entries.insert(entry.id, entry.clone());

        if let Err(e) = self.persist(&state).await {
            // Compensate: remove the payload and restore the prior index
            // state so a failed write never leaves a dangling reference.
            state.entries.remove(&entry.id);
            match previous_index_entry {
                Some(prev) => {
                    state.primary_key_index.insert(entry.primary_key.clone(), prev);
                }
                None => {
                    state.primary_key_index.remove(&entry.primary_key);
                }
            }
            return Err(e);
        }

        Ok(entry)
    }

    /// Entries from `remote_id`'s cursor onward, in id order. Advances the
    /// remote's pull cursor so it never regresses.
    pub async fn entries_since(&self, remote_id: &str, since: Option<EntryId>) -> Vec<Entry> {
        let mut state = self.state.write().await;
        let cursor = state.remotes.entry(remote_id.to_string()).or_default();
        let start = since.or(cursor.next_sequence);

        let result: Vec<Entry> = match start {
            Some(start) => state
                .entries
                .range((
                    std::ops::Bound::Excluded(start),
                    std::ops::Bound::Unbounded,
                ))
                .map(|(_, e)| e.clone())
                .collect(),
            None => state.entries.values().cloned().collect(),
        };

        if let Some(last) = result.last() {
            let next = last.id.next();
            cursor.next_sequence = Some(match cursor.next_sequence {
                Some(current) if current > next => current,
                _ => next,
            });
        }

        result
    }

    /// Apply entries pushed by a remote, resolving primary-key conflicts via
    /// the configured [`ConflictPolicy`].
    pub async fn write_from_remote(
        &self,
        remote_id: &str,
        remote_entries: Vec<Entry>,
    ) -> Result<(), JournalError> {
        let mut state = self.state.write().await;
        let mut last_applied: Option<EntryId> = None;

        for incoming in remote_entries {
            last_applied = Some(last_applied.map_or(incoming.id, |m| m.max(incoming.id)));

            let existing_id = state.primary_key_index.get(&incoming.primary_key).copied();
            let existing = existing_id.and_then(|id| state.entries.get(&id).cloned());

            match existing {
                None => {
                    state
                        .primary_key_index
                        .insert(incoming.primary_key.clone(), incoming.id);
                    state.entries.insert(incoming.id, incoming);
                }
                Some(existing) if existing.id == incoming.id => {
                    // Already applied; idempotent no-op.
                }
                Some(existing) => match self.conflict_policy.resolve(&incoming, &existing) {
                    ConflictDecision::KeepIncoming => {
                        state.entries.remove(&existing.id);
                        state
                            .primary_key_index
                            .insert(incoming.primary_key.clone(), incoming.id);
                        state.entries.insert(incoming.id, incoming);
                    }
                    ConflictDecision::KeepExisting => {}
                    ConflictDecision::KeepMerged(merged) => {
                        state.entries.remove(&existing.id);
                        state
                            .primary_key_index
                            .insert(merged.primary_key.clone(), merged.id);
                        state.entries.insert(merged.id, merged);
                    }
                    ConflictDecision::Reject => {
                        return Err(crate::types::ConflictError::Rejected {
                            primary_key: incoming.primary_key.clone(),
                        }
                        .into());
                    }
                },
            }
        }

        if let Some(last_applied) = last_applied {
            let cursor = state.remotes.entry(remote_id.to_string()).or_default();
            let candidate = last_applied.next();
            cursor.next_sequence = Some(match cursor.next_sequence {
                Some(current) if current > candidate => current,
                _ => candidate,
            });
        }

        self.persist(&state).await
    }

    /// Entries this remote has not yet acknowledged.
    pub async fn uncommitted_for(&self, remote_id: &str) -> Vec<Entry> {
        let state = self.state.read().await;
        let committed = state.remotes.get(remote_id).and_then(|c| c.committed_up_to);
        match committed {
            Some(committed) => state
                .entries
                .range((
                    std::ops::Bound::Excluded(committed),
                    std::ops::Bound::Unbounded,
                ))
                .map(|(_, e)| e.clone())
                .collect(),
            None => state.entries.values().cloned().collect(),
        }
    }

    /// Mark entries up to and including `up_to` as committed for `remote_id`.
    pub async fn acknowledge(&self, remote_id: &str, up_to: EntryId) -> Result<(), JournalError> {
        let mut state = self.state.write().await;
        let cursor = state.remotes.entry(remote_id.to_string()).or_default();
        cursor.committed_up_to = Some(match cursor.committed_up_to {
            Some(current) if current > up_to => current,
            _ => up_to,
        });
        self.persist(&state).await
    }

    /// Register a compactor that governs retention for the given event tags.
    pub async fn register_compaction(
        &self,
        event_tags: impl IntoIterator<Item = impl Into<String>>,
        strategy: Arc<dyn CompactionStrategy>,
    ) {
        let tags: HashSet<String> = event_tags.into_iter().map(Into::into).collect();
        self.compactors.write().await.push((tags, strategy));
    }

    /// Run every registered compactor over its matching entries.
    pub async fn compact(&self, now_millis: u64) -> Result<usize, JournalError> {
        let compactors = self.compactors.read().await;
        let mut state = self.state.write().await;
        let mut removed = 0usize;

        for (tags, strategy) in compactors.iter() {
            let matching: Vec<Entry> = state
                .entries
                .values()
                .filter(|e| tags.contains(&e.event))
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }

            let retained = strategy.retain(&matching, now_millis);
            let retained_ids: HashSet<EntryId> = retained.iter().map(|e| e.id).collect();

            for e in &matching {
                if !retained_ids.contains(&e.id) {
                    state.entries.remove(&e.id);
                    removed += 1;
                }
            }
        }

        // Self-repair: drop primary-key index entries left dangling by compaction.
        let existing_ids: HashSet<EntryId> = state.entries.keys().copied().collect();
        state
            .primary_key_index
            .retain(|_, id| existing_ids.contains(id));

        self.persist(&state).await?;
        Ok(removed)
    }

    /// Like [`Journal::compact`] but requires every named tag to already
    /// have a registered compactor, surfacing [`JournalError::NoCompactor`]
    /// otherwise instead of silently skipping it.
    pub async fn compact_tags(&self, tags: &[&str], now_millis: u64) -> Result<usize, JournalError> {
        let compactors = self.compactors.read().await;
        for tag in tags {
            if !compactors.iter().any(|(registered, _)| registered.contains(*tag)) {
                return Err(JournalError::NoCompactor((*tag).to_string()));
            }
        }
        drop(compactors);
        self.compact(now_millis).await
    }

    /// All entries in id order; primarily for tests and replay.
    pub async fn all_entries(&self) -> Vec<Entry> {
        self.state.read().await.entries.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    async fn open_journal() -> Journal<MemoryKvStore> {
        Journal::open(
            Arc::new(MemoryKvStore::new()),
            "chat-history",
            Arc::new(LastWriteWins),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn append_assigns_strictly_increasing_ids() {
        let journal = open_journal().await;
        let a = journal
            .append("chat_event", "s:1", Bytes::from_static(b"one"))
            .await
            .unwrap();
        let b = journal
            .append("chat_event", "s:2", Bytes::from_static(b"two"))
            .await
            .unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn id_ordered_iteration_equals_insertion_order() {
        let journal = open_journal().await;
        let mut inserted = Vec::new();
        for i in 0..10 {
            let e = journal
                .append("chat_event", format!("s:{i}"), Bytes::new())
                .await
                .unwrap();
            inserted.push(e.id);
        }
        let read: Vec<_> = journal.all_entries().await.into_iter().map(|e| e.id).collect();
        assert_eq!(read, inserted);
    }

    #[tokio::test]
    async fn entries_since_returns_strict_suffix() {
        let journal = open_journal().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                journal
                    .append("chat_event", format!("s:{i}"), Bytes::new())
                    .await
                    .unwrap()
                    .id,
            );
        }
        let suffix = journal.entries_since("remote-a", Some(ids[2])).await;
        assert_eq!(suffix.iter().map(|e| e.id).collect::<Vec<_>>(), &ids[3..]);
    }

    #[tokio::test]
    async fn write_from_remote_resolves_conflict_with_last_write_wins() {
        let journal = open_journal().await;
        let local = journal
            .append("chat_event", "s:1", Bytes::from_static(b"local"))
            .await
            .unwrap();

        let incoming = Entry {
            id: local.id.next().next(),
            event: "chat_event".to_string(),
            primary_key: "s:1".to_string(),
            payload: Bytes::from_static(b"remote"),
        };
        journal
            .write_from_remote("remote-a", vec![incoming.clone()])
            .await
            .unwrap();

        let all = journal.all_entries().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].payload, Bytes::from_static(b"remote"));
    }

    #[tokio::test]
    async fn write_from_remote_with_reject_policy_errors() {
        let journal = Journal::open(
            Arc::new(MemoryKvStore::new()),
            "chat-history",
            Arc::new(Reject),
        )
        .await
        .unwrap();
        let local = journal
            .append("chat_event", "s:1", Bytes::from_static(b"local"))
            .await
            .unwrap();
        let incoming = Entry {
            id: local.id.next(),
            event: "chat_event".to_string(),
            primary_key: "s:1".to_string(),
            payload: Bytes::from_static(b"remote"),
        };
        let result = journal.write_from_remote("remote-a", vec![incoming]).await;
        assert!(matches!(result, Err(JournalError::Conflict(_))));
    }

    #[tokio::test]
    async fn uncommitted_for_and_acknowledge() {
        let journal = open_journal().await;
        let a = journal
            .append("chat_event", "s:1", Bytes::new())
            .await
            .unwrap();
        let b = journal
            .append("chat_event", "s:2", Bytes::new())
            .await
            .unwrap();

        let uncommitted = journal.uncommitted_for("remote-a").await;
        assert_eq!(uncommitted.len(), 2);

        journal.acknowledge("remote-a", a.id).await.unwrap();
        let uncommitted = journal.uncommitted_for("remote-a").await;
        assert_eq!(uncommitted.len(), 1);
        assert_eq!(uncommitted[0].id, b.id);
    }

    #[tokio::test]
    async fn compact_applies_registered_strategy_to_matching_tags_only() {
        let journal = open_journal().await;
        for i in 0..5 {
            journal
                .append("chat_event", format!("s:{i}"), Bytes::new())
                .await
                .unwrap();
        }
        journal
            .append("artifact_record", "a:1", Bytes::new())
            .await
            .unwrap();

        journal
            .register_compaction(["chat_event"], Arc::new(ByCount { max_entries: 2 }))
            .await;
        let removed = journal.compact(0).await.unwrap();
        assert_eq!(removed, 3);

        let remaining = journal.all_entries().await;
        assert_eq!(remaining.len(), 3); // 2 chat_event + 1 artifact_record
        assert!(remaining.iter().any(|e| e.event == "artifact_record"));
    }

    #[tokio::test]
    async fn compact_tags_errors_when_no_compactor_registered() {
        let journal = open_journal().await;
        let err = journal.compact_tags(&["chat_event"], 0).await.unwrap_err();
        assert!(matches!(err, JournalError::NoCompactor(tag) if tag == "chat_event"));
    }

    #[tokio::test]
    async fn reopening_resumes_the_id_allocator_past_persisted_entries() {
        let kv = Arc::new(MemoryKvStore::new());
        let last_id;
        {
            let journal = Journal::open(kv.clone(), "chat-history", Arc::new(LastWriteWins))
                .await
                .unwrap();
            for i in 0..3 {
                journal
                    .append("chat_event", format!("s:{i}"), Bytes::new())
                    .await
                    .unwrap();
            }
            last_id = journal.all_entries().await.last().unwrap().id;
        }

        let reopened = Journal::open(kv, "chat-history", Arc::new(LastWriteWins))
            .await
            .unwrap();
        let next = reopened
            .append("chat_event", "s:new", Bytes::new())
            .await
            .unwrap();
        assert!(next.id > last_id);
        assert_eq!(reopened.all_entries().await.len(), 4);
    }
}

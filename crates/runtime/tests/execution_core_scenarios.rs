//! End-to-end scenarios spanning the query supervisor, chat history, artifact
//! store, and journal conflict resolution in combination, rather than one
//! module in isolation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::json;

use loomcore_runtime::journal::{Entry, FirstWriteWins, Journal, LastWriteWins};
use loomcore_runtime::kv::MemoryKvStore;
use loomcore_runtime::prelude::*;
use loomcore_runtime::store::{ArtifactRecord, ArtifactRetention, ArtifactStore, ChatEventSource, ChatRetention, SessionIndex};
use loomcore_runtime::supervisor::QueueStrategy;
use loomcore_runtime::types::{BackendError, SupervisorError};

struct EchoHandle;

#[async_trait]
impl QueryHandle for EchoHandle {
    fn messages(&self) -> BoxStream<'static, serde_json::Value> {
        Box::pin(futures::stream::empty())
    }
    async fn close_input(&self) {}
    async fn interrupt(&self) {}
}

/// Backend whose `start` blocks until released, so a test can control
/// exactly how long a submitted query occupies a concurrency slot.
struct GatedBackend {
    gate: Arc<tokio::sync::Notify>,
    started: AtomicUsize,
}

impl GatedBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Arc::new(tokio::sync::Notify::new()),
            started: AtomicUsize::new(0),
        })
    }

    fn release(&self) {
        self.gate.notify_waiters();
    }
}

#[async_trait]
impl QueryBackend for GatedBackend {
    async fn start(&self, _prompt: String, _options: QueryOptions) -> Result<Arc<dyn QueryHandle>, BackendError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(EchoHandle))
    }
}

#[tokio::test]
async fn concurrent_admission_blocks_the_third_submitter() {
    let backend = GatedBackend::new();
    let supervisor = QuerySupervisor::new(
        backend.clone(),
        SupervisorConfig {
            concurrency_limit: 2,
            pending_queue_capacity: 0,
            ..Default::default()
        },
    );

    let a = supervisor.submit("a".to_string(), QueryOptions::default()).await.unwrap();
    let b = supervisor.submit("b".to_string(), QueryOptions::default()).await.unwrap();
    assert_eq!(supervisor.stats().active_queries, 2);

    let supervisor2 = supervisor.clone();
    let third = tokio::spawn(async move {
        supervisor2.submit("c".to_string(), QueryOptions::default()).await.unwrap()
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!third.is_finished(), "third submitter should still be blocked at the semaphore");

    drop(a);
    let c = third.await.unwrap();
    assert_eq!(supervisor.stats().active_queries, 2);
    drop(b);
    drop(c);
}

#[tokio::test]
async fn dropping_overflow_fails_third_submit_with_queue_full() {
    let backend = GatedBackend::new();
    let supervisor = QuerySupervisor::new(
        backend.clone(),
        SupervisorConfig {
            concurrency_limit: 1,
            pending_queue_capacity: 1,
            pending_queue_strategy: QueueStrategy::Dropping,
            ..Default::default()
        },
    );

    // A holds the only slot.
    let a = supervisor.submit("a".to_string(), QueryOptions::default()).await.unwrap();

    // B parks in the one-slot pending queue.
    let supervisor2 = supervisor.clone();
    let b = tokio::spawn(async move { supervisor2.submit("b".to_string(), QueryOptions::default()).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // C finds both the slot and the queue occupied.
    let c = supervisor.submit("c".to_string(), QueryOptions::default()).await;
    assert!(matches!(
        c,
        Err(SupervisorError::QueueFull { capacity: 1, .. })
    ));
    match c {
        Err(SupervisorError::QueueFull { capacity, strategy }) => {
            assert_eq!(capacity, 1);
            assert_eq!(strategy, "dropping");
        }
        _ => unreachable!(),
    }

    drop(a);
    b.await.unwrap().unwrap();
}

#[tokio::test]
async fn pending_timeout_returns_timeout_after_configured_duration() {
    let backend = GatedBackend::new();
    let supervisor = QuerySupervisor::new(
        backend.clone(),
        SupervisorConfig {
            concurrency_limit: 1,
            pending_queue_capacity: 4,
            max_pending_time: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );

    let _held = supervisor.submit("a".to_string(), QueryOptions::default()).await.unwrap();
    let result = supervisor.submit("b".to_string(), QueryOptions::default()).await;
    assert!(matches!(
        result,
        Err(SupervisorError::PendingTimeout { timeout_ms: 50, .. })
    ));
}

#[tokio::test]
async fn chat_retention_keeps_latest_two_events() {
    let kv = Arc::new(MemoryKvStore::new());
    let index = Arc::new(SessionIndex::new(kv.clone()));
    let store = ChatHistoryStore::new(kv, index, ChatRetention { max_events: Some(2), max_age_ms: None }, 100);

    for i in 0..3u64 {
        store
            .append_message("s:1", json!({"n": i}), ChatEventSource::User, i)
            .await
            .unwrap();
    }
    store.cleanup(0).await.unwrap();

    let remaining = store.list("s:1", Default::default()).await.unwrap();
    assert_eq!(remaining.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![2, 3]);
}

#[tokio::test]
async fn artifact_size_retention_keeps_newest_within_budget() {
    let kv = Arc::new(MemoryKvStore::new());
    let index = Arc::new(SessionIndex::new(kv.clone()));
    let store = ArtifactStore::new(
        kv,
        index,
        ArtifactRetention {
            max_artifacts: None,
            max_artifact_bytes: Some(100),
            max_age_ms: None,
        },
    );

    for (id, created_at, size) in [("a1", 0u64, 60u64), ("a2", 1, 50), ("a3", 2, 30)] {
        store
            .put(ArtifactRecord {
                id: id.to_string(),
                session_id: "s:1".to_string(),
                kind: "text".to_string(),
                encoding: "utf8".to_string(),
                content: Bytes::from(vec![0u8; size as usize]),
                created_at,
                size_bytes: Some(size),
                deleted_at: None,
            })
            .await
            .unwrap();
    }

    let ids: Vec<_> = store
        .list("s:1", Default::default())
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["a2", "a3"]);
}

#[tokio::test]
async fn conflict_resolution_last_write_wins_keeps_larger_id() {
    let kv = Arc::new(MemoryKvStore::new());
    let journal = Journal::open(kv, "chat-history", Arc::new(LastWriteWins)).await.unwrap();

    let first = journal.append("chat_event", "s:1", Bytes::from_static(b"a")).await.unwrap();
    let second = Entry {
        id: first.id.next(),
        event: "chat_event".to_string(),
        primary_key: "s:1".to_string(),
        payload: Bytes::from_static(b"b"),
    };
    // Feed the larger id first, then the smaller, to check order doesn't matter.
    journal.write_from_remote("remote-a", vec![second.clone(), first.clone()]).await.unwrap();

    let entries = journal.all_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, second.id);
    assert_eq!(entries[0].payload, Bytes::from_static(b"b"));
}

#[tokio::test]
async fn conflict_resolution_first_write_wins_keeps_smaller_id() {
    let kv = Arc::new(MemoryKvStore::new());
    let journal = Journal::open(kv, "chat-history", Arc::new(FirstWriteWins)).await.unwrap();

    let first = journal.append("chat_event", "s:1", Bytes::from_static(b"a")).await.unwrap();
    let second = Entry {
        id: first.id.next(),
        event: "chat_event".to_string(),
        primary_key: "s:1".to_string(),
        payload: Bytes::from_static(b"b"),
    };
    journal.write_from_remote("remote-a", vec![second]).await.unwrap();

    let entries = journal.all_entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, first.id);
    assert_eq!(entries[0].payload, Bytes::from_static(b"a"));
}

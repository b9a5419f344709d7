//! The pending-queue waiting room and its three overflow disciplines.

use std::collections::VecDeque;

use tokio::sync::{oneshot, Mutex, Notify};

use crate::supervisor::backend::QueryOptions;
use crate::types::QueryId;

use super::query_supervisor::PendingOutcome;

/// Overflow policy applied when the waiting room is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStrategy {
    /// `offer` blocks the caller until a slot opens up.
    Suspend,
    /// `offer` rejects the new request with `QueueFull`.
    Dropping,
    /// `offer` evicts the oldest pending request (resolved as cancelled) and
    /// admits the new one in its place.
    Sliding,
}

impl QueueStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStrategy::Suspend => "suspend",
            QueueStrategy::Dropping => "dropping",
            QueueStrategy::Sliding => "sliding",
        }
    }
}

/// One request waiting for an admission slot.
pub struct PendingEntry {
    pub query_id: QueryId,
    pub prompt: String,
    pub options: QueryOptions,
    pub submitted_at: u64,
    pub resolver: oneshot::Sender<PendingOutcome>,
}

/// FIFO waiting room gating entry into the admission worker.
///
/// `suspend` relies on `Notify`'s single buffered permit: a `notify_one` that
/// races ahead of the waiter's `notified().await` is not lost, which is
/// enough to make the retry loop below correct for this queue's single
/// consumer (the admission worker) and single class of producer (`offer`).
pub struct PendingQueue {
    capacity: usize,
    strategy: QueueStrategy,
    inner: Mutex<VecDeque<PendingEntry>>,
    not_full: Notify,
    not_empty: Notify,
}

impl PendingQueue {
    pub fn new(capacity: usize, strategy: QueueStrategy) -> Self {
        Self {
            capacity,
            strategy,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            not_full: Notify::new(),
            not_empty: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn strategy(&self) -> QueueStrategy {
        self.strategy
    }

    /// Admits `entry` into the waiting room per the configured discipline.
    /// Returns the evicted entry (to resolve as cancelled) when `sliding`
    /// makes room, or an error when `dropping` is at capacity.
    pub async fn offer(&self, entry: PendingEntry) -> Result<Option<PendingEntry>, PendingEntry> {
        loop {
            let mut guard = self.inner.lock().await;
            if guard.len() < self.capacity {
                guard.push_back(entry);
                drop(guard);
                self.not_empty.notify_one();
                return Ok(None);
            }
            match self.strategy {
                QueueStrategy::Dropping => return Err(entry),
                QueueStrategy::Sliding => {
                    let evicted = guard.pop_front();
                    guard.push_back(entry);
                    drop(guard);
                    self.not_empty.notify_one();
                    return Ok(evicted);
                }
                QueueStrategy::Suspend => {
                    drop(guard);
                    self.not_full.notified().await;
                }
            }
        }
    }

    /// Removes and returns the oldest entry, waiting if the queue is empty.
    pub async fn take(&self) -> PendingEntry {
        loop {
            let mut guard = self.inner.lock().await;
            if let Some(entry) = guard.pop_front() {
                drop(guard);
                self.not_full.notify_one();
                return entry;
            }
            drop(guard);
            self.not_empty.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Best-effort length for sync contexts (stats snapshots); returns the
    /// last-known size if the queue is momentarily locked by a concurrent
    /// `offer`/`take`.
    pub fn try_len(&self) -> usize {
        self.inner.try_lock().map(|guard| guard.len()).unwrap_or(0)
    }

    /// Drains every waiting entry; used by shutdown to cancel them all.
    pub async fn drain(&self) -> Vec<PendingEntry> {
        let mut guard = self.inner.lock().await;
        let drained = guard.drain(..).collect();
        drop(guard);
        self.not_full.notify_one();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn entry(id: QueryId) -> (PendingEntry, oneshot::Receiver<PendingOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingEntry {
                query_id: id,
                prompt: "hi".to_string(),
                options: QueryOptions::default(),
                submitted_at: 0,
                resolver: tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn dropping_rejects_once_full() {
        let queue = PendingQueue::new(1, QueueStrategy::Dropping);
        let (e1, _r1) = entry(QueryId::new());
        assert!(queue.offer(e1).await.unwrap().is_none());

        let (e2, _r2) = entry(QueryId::new());
        assert!(queue.offer(e2).await.is_err());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn sliding_evicts_the_oldest_entry() {
        let queue = PendingQueue::new(1, QueueStrategy::Sliding);
        let first_id = QueryId::new();
        let (e1, _r1) = entry(first_id);
        assert!(queue.offer(e1).await.unwrap().is_none());

        let (e2, _r2) = entry(QueryId::new());
        let evicted = queue.offer(e2).await.unwrap().expect("eviction");
        assert_eq!(evicted.query_id, first_id);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn suspend_blocks_until_a_slot_is_taken() {
        let queue = std::sync::Arc::new(PendingQueue::new(1, QueueStrategy::Suspend));
        let (e1, _r1) = entry(QueryId::new());
        queue.offer(e1).await.unwrap();

        let queue2 = queue.clone();
        let second_id = QueryId::new();
        let offering = tokio::spawn(async move {
            let (e2, _r2) = entry(second_id);
            queue2.offer(e2).await.unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!offering.is_finished());

        let taken = queue.take().await;
        assert_ne!(taken.query_id, second_id);

        offering.await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn take_waits_for_an_entry_to_arrive() {
        let queue = std::sync::Arc::new(PendingQueue::new(4, QueueStrategy::Dropping));
        let queue2 = queue.clone();
        let id = QueryId::new();
        let taker = tokio::spawn(async move { queue2.take().await });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let (e, _r) = entry(id);
        queue.offer(e).await.unwrap();

        let taken = taker.await.unwrap();
        assert_eq!(taken.query_id, id);
    }
}

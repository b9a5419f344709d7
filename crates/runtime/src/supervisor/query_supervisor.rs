//! Bounded-concurrency admission, lifecycle tracking, and shutdown for agent
//! queries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::Stream;
use parking_lot::Mutex as SyncMutex;
use regex::Regex;
use tokio::sync::{oneshot, Semaphore};

use crate::supervisor::backend::{QueryBackend, QueryHandle, QueryOptions};
use crate::supervisor::events::{EventBus, QueryOutcome, SupervisorEvent};
use crate::supervisor::metrics::SupervisorMetricsRecorder;
use crate::supervisor::queue::{PendingEntry, PendingQueue, QueueStrategy};
use crate::types::{QueryId, SupervisorError};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn session_id_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:-]{0,127}$").unwrap())
}

fn validate_prompt(prompt: &str, max_prompt_chars: usize) -> Result<(), SupervisorError> {
    if prompt.is_empty() {
        return Err(SupervisorError::InvalidPrompt {
            reason: "prompt must not be empty".to_string(),
        });
    }
    if prompt.chars().count() > max_prompt_chars {
        return Err(SupervisorError::InvalidPrompt {
            reason: format!("prompt exceeds {max_prompt_chars} characters"),
        });
    }
    Ok(())
}

fn validate_session_id(session_id: &str) -> Result<(), SupervisorError> {
    if !session_id_pattern().is_match(session_id) {
        return Err(SupervisorError::InvalidSessionId {
            session_id: session_id.to_string(),
            reason: "must be 1-128 characters of [A-Za-z0-9._:-], starting alphanumeric"
                .to_string(),
        });
    }
    Ok(())
}

/// Outcome delivered to a submitter waiting in the pending queue.
pub enum PendingOutcome {
    Admitted(Arc<dyn QueryHandle>),
    Failed(SupervisorError),
    Cancelled,
}

/// Static admission and observability settings for a [`QuerySupervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub concurrency_limit: usize,
    pub pending_queue_capacity: usize,
    pub pending_queue_strategy: QueueStrategy,
    pub max_pending_time: Option<Duration>,
    pub max_prompt_chars: usize,
    pub metrics_enabled: bool,
    pub tracing_enabled: bool,
    pub emit_events: bool,
    pub event_buffer_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            pending_queue_capacity: 0,
            pending_queue_strategy: QueueStrategy::Suspend,
            max_pending_time: None,
            max_prompt_chars: 32_000,
            metrics_enabled: true,
            tracing_enabled: true,
            emit_events: true,
            event_buffer_capacity: 256,
        }
    }
}

/// Point-in-time view of admission state, mirrored into
/// [`crate::metrics::SupervisorMetrics`] when metrics are enabled.
#[derive(Debug, Clone)]
pub struct SupervisorStats {
    pub active_queries: usize,
    pub pending_queries: usize,
    pub concurrency_limit: usize,
    pub pending_queue_strategy: &'static str,
}

struct Inner {
    config: SupervisorConfig,
    semaphore: Arc<Semaphore>,
    active: DashMap<QueryId, Arc<dyn QueryHandle>>,
    pending_queue: Option<PendingQueue>,
    metrics: Option<SupervisorMetricsRecorder>,
    events: EventBus,
    shutting_down: AtomicBool,
}

impl Inner {
    fn emit(&self, event: SupervisorEvent) {
        if self.config.emit_events {
            self.events.publish(event);
        }
    }

    fn finalize(&self, query_id: QueryId, started_at: u64, status: QueryOutcome) {
        self.active.remove(&query_id);
        self.semaphore.add_permits(1);
        if let Some(metrics) = &self.metrics {
            metrics.record_completed(status == QueryOutcome::Success, now_millis().saturating_sub(started_at));
        }
        self.emit(SupervisorEvent::QueryCompleted {
            query_id,
            status,
            timestamp_ms: now_millis(),
        });
    }
}

/// Handle to an admitted, running query. Dropping it (or calling
/// [`ActiveQueryHandle::finish`] first) runs the scope finaliser: it removes
/// the query from the active set, releases its concurrency slot, records the
/// duration histogram sample, and emits `QueryCompleted`.
pub struct ActiveQueryHandle {
    query_id: QueryId,
    started_at: u64,
    handle: Arc<dyn QueryHandle>,
    inner: Arc<Inner>,
    outcome: SyncMutex<Option<QueryOutcome>>,
}

impl ActiveQueryHandle {
    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    pub fn messages(&self) -> BoxStream<'static, serde_json::Value> {
        self.handle.messages()
    }

    pub async fn close_input(&self) {
        self.handle.close_input().await
    }

    pub async fn interrupt(&self) {
        self.handle.interrupt().await
    }

    /// Records the terminal status before the handle is dropped. If never
    /// called, drop treats the exit as `interrupted`.
    pub fn finish(&self, status: QueryOutcome) {
        *self.outcome.lock() = Some(status);
    }
}

impl Drop for ActiveQueryHandle {
    fn drop(&mut self) {
        let status = self.outcome.lock().take().unwrap_or(QueryOutcome::Interrupted);
        self.inner.finalize(self.query_id, self.started_at, status);
    }
}

/// Message stream returned by [`QuerySupervisor::submit_stream`]; carries the
/// [`ActiveQueryHandle`] along so the concurrency slot is held until the
/// stream is exhausted (marking the query `Success`) or dropped early
/// (leaving the default `Interrupted` outcome).
struct ScopedMessageStream {
    handle: Option<ActiveQueryHandle>,
    inner: BoxStream<'static, serde_json::Value>,
}

impl Stream for ScopedMessageStream {
    type Item = serde_json::Value;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.as_mut().get_mut();
        match this.inner.as_mut().poll_next(cx) {
            std::task::Poll::Ready(Some(item)) => std::task::Poll::Ready(Some(item)),
            std::task::Poll::Ready(None) => {
                if let Some(handle) = this.handle.take() {
                    handle.finish(QueryOutcome::Success);
                }
                std::task::Poll::Ready(None)
            }
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

/// Admits, tracks, and tears down agent queries under a global concurrency
/// limit, with an optional waiting room for overflow.
pub struct QuerySupervisor<B: QueryBackend> {
    backend: Arc<B>,
    inner: Arc<Inner>,
}

impl<B: QueryBackend + 'static> QuerySupervisor<B> {
    pub fn new(backend: Arc<B>, config: SupervisorConfig) -> Arc<Self> {
        let pending_queue = if config.pending_queue_capacity > 0 {
            Some(PendingQueue::new(
                config.pending_queue_capacity,
                config.pending_queue_strategy,
            ))
        } else {
            None
        };
        let metrics = config.metrics_enabled.then(SupervisorMetricsRecorder::new);
        let events = EventBus::new(config.emit_events, config.event_buffer_capacity);
        let semaphore = Arc::new(Semaphore::new(config.concurrency_limit));

        let inner = Arc::new(Inner {
            config,
            semaphore,
            active: DashMap::new(),
            pending_queue,
            metrics,
            events,
            shutting_down: AtomicBool::new(false),
        });

        let supervisor = Arc::new(Self {
            backend,
            inner: inner.clone(),
        });

        if inner.pending_queue.is_some() {
            let worker = supervisor.clone();
            tokio::spawn(async move { worker.run_worker().await });
        }

        supervisor
    }

    /// Submits a prompt for execution, blocking the caller until the query
    /// is admitted (directly, or after waiting in the pending queue).
    pub async fn submit(
        &self,
        prompt: String,
        options: QueryOptions,
    ) -> Result<ActiveQueryHandle, SupervisorError> {
        validate_prompt(&prompt, self.inner.config.max_prompt_chars)?;
        if let Some(session_id) = &options.session_id {
            validate_session_id(session_id)?;
        }

        let query_id = QueryId::new();
        let submitted_at = now_millis();

        let Some(pending_queue) = &self.inner.pending_queue else {
            let handle = self.admit(query_id, prompt, options).await?;
            return Ok(ActiveQueryHandle {
                query_id,
                started_at: submitted_at,
                handle,
                inner: self.inner.clone(),
                outcome: SyncMutex::new(None),
            });
        };

        let (resolver, receiver) = oneshot::channel();
        let entry = PendingEntry {
            query_id,
            prompt,
            options,
            submitted_at,
            resolver,
        };

        match pending_queue.offer(entry).await {
            Ok(evicted) => {
                if let Some(evicted) = evicted {
                    let _ = evicted.resolver.send(PendingOutcome::Cancelled);
                }
            }
            Err(rejected) => {
                drop(rejected);
                return Err(SupervisorError::QueueFull {
                    capacity: pending_queue.capacity(),
                    strategy: pending_queue.strategy().as_str().to_string(),
                });
            }
        }

        self.inner.emit(SupervisorEvent::QueryQueued {
            query_id,
            timestamp_ms: submitted_at,
        });

        let outcome = match self.inner.config.max_pending_time {
            Some(timeout) => match tokio::time::timeout(timeout, receiver).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => PendingOutcome::Cancelled,
                Err(_) => {
                    return Err(SupervisorError::PendingTimeout {
                        query_id,
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            },
            None => receiver.await.unwrap_or(PendingOutcome::Cancelled),
        };

        match outcome {
            // The worker already registered this query as active; just wrap
            // the handle for this caller's scope finaliser.
            PendingOutcome::Admitted(handle) => Ok(ActiveQueryHandle {
                query_id,
                started_at: submitted_at,
                handle,
                inner: self.inner.clone(),
                outcome: SyncMutex::new(None),
            }),
            PendingOutcome::Failed(e) => Err(e),
            PendingOutcome::Cancelled => Err(SupervisorError::PendingCancelled(query_id)),
        }
    }

    /// Like [`Self::submit`], but returns only the message stream. The
    /// concurrency slot is held for as long as the returned stream is —
    /// the underlying [`ActiveQueryHandle`] rides along inside the stream
    /// and its scope finaliser only runs once the stream is exhausted or
    /// dropped, not when this function returns.
    pub async fn submit_stream(
        &self,
        prompt: String,
        options: QueryOptions,
    ) -> Result<BoxStream<'static, serde_json::Value>, SupervisorError> {
        let handle = self.submit(prompt, options).await?;
        let inner = handle.messages();
        Ok(Box::pin(ScopedMessageStream {
            handle: Some(handle),
            inner,
        }))
    }

    /// Acquires a concurrency slot and starts the backend. On success the
    /// query is registered in the active map (ownership of the returned
    /// handle, and thus of the eventual scope finaliser, is the caller's).
    async fn admit(
        &self,
        query_id: QueryId,
        prompt: String,
        options: QueryOptions,
    ) -> Result<Arc<dyn QueryHandle>, SupervisorError> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SupervisorError::PendingCancelled(query_id))?;
        permit.forget();

        let span = self
            .inner
            .config
            .tracing_enabled
            .then(|| tracing::info_span!("agent.query", query_id = %query_id));
        let _entered = span.as_ref().map(|s| s.enter());

        match self.backend.start(prompt, options).await {
            Ok(handle) => {
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_started();
                }
                self.inner.active.insert(query_id, handle.clone());
                self.inner.emit(SupervisorEvent::QueryStarted {
                    query_id,
                    timestamp_ms: now_millis(),
                });
                Ok(handle)
            }
            Err(e) => {
                self.inner.semaphore.add_permits(1);
                if let Some(metrics) = &self.inner.metrics {
                    metrics.record_start_failed();
                }
                self.inner.emit(SupervisorEvent::QueryStartFailed {
                    query_id,
                    error_tag: Some(e.to_string()),
                    timestamp_ms: now_millis(),
                });
                Err(SupervisorError::Backend(e))
            }
        }
    }

    /// The single long-lived worker draining the pending queue. Only spawned
    /// when a pending queue is configured.
    async fn run_worker(self: Arc<Self>) {
        let queue = self.inner.pending_queue.as_ref().expect("worker requires a queue");
        loop {
            if self.inner.shutting_down.load(Ordering::Acquire) {
                return;
            }
            let entry = queue.take().await;
            if entry.resolver.is_closed() {
                continue;
            }

            match self.admit(entry.query_id, entry.prompt, entry.options).await {
                Ok(handle) => {
                    if let Err(PendingOutcome::Admitted(handle)) =
                        entry.resolver.send(PendingOutcome::Admitted(handle))
                    {
                        // The submitter gave up (timeout or cancellation)
                        // before admission finished. Interrupt the backend
                        // and run the finaliser ourselves so the slot and
                        // active-map entry aren't leaked.
                        handle.interrupt().await;
                        self.inner.finalize(entry.query_id, entry.submitted_at, QueryOutcome::Interrupted);
                    }
                }
                Err(e) => {
                    let _ = entry.resolver.send(PendingOutcome::Failed(e));
                }
            }
        }
    }

    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            active_queries: self.inner.active.len(),
            pending_queries: self
                .inner
                .pending_queue
                .as_ref()
                .map(|q| q.try_len())
                .unwrap_or(0),
            concurrency_limit: self.inner.config.concurrency_limit,
            pending_queue_strategy: self
                .inner
                .pending_queue
                .as_ref()
                .map(|q| q.strategy().as_str())
                .unwrap_or("none"),
        }
    }

    pub async fn pending_count(&self) -> usize {
        match &self.inner.pending_queue {
            Some(queue) => queue.len().await,
            None => 0,
        }
    }

    /// Signals every active handle to close input and interrupt. Does not
    /// wait for them to finish; callers observe completion via `events`.
    pub async fn interrupt_all(&self) {
        let handles: Vec<Arc<dyn QueryHandle>> =
            self.inner.active.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            handle.close_input().await;
            handle.interrupt().await;
        }
    }

    pub fn events(&self) -> BoxStream<'static, SupervisorEvent> {
        self.inner.events.subscribe()
    }

    /// Interrupts all active handles, drains and cancels the pending queue,
    /// and stops the admission worker.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        self.interrupt_all().await;
        if let Some(queue) = &self.inner.pending_queue {
            for entry in queue.drain().await {
                let _ = entry.resolver.send(PendingOutcome::Cancelled);
            }
        }
    }
}

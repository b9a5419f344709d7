//! Owns one connector fiber per remote, the status board, and the
//! periodic sync scheduler.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::journal::Journal;
use crate::kv::KeyValueStore;
use crate::sync::connector::{run_once, Connector};
use crate::sync::status::{RemoteStatus, StatusBoard};
use crate::types::SyncError;

struct ConnectorHandle {
    cancellation: CancellationToken,
    task: JoinHandle<()>,
}

/// Background settings for [`SyncService`].
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Period for the background `syncNow` sweep. Zero or unset disables it.
    pub sync_interval: Option<Duration>,
}

pub struct SyncService<S: KeyValueStore> {
    journal: Arc<Journal<S>>,
    identity: String,
    status: Arc<StatusBoard>,
    connectors: DashMap<String, (Arc<dyn Connector>, ConnectorHandle)>,
    sync_semaphore: Arc<Semaphore>,
    scheduler: std::sync::Mutex<Option<JoinHandle<()>>>,
    disable_ping: bool,
}

impl<S: KeyValueStore + Send + Sync + 'static> SyncService<S> {
    pub fn new(journal: Arc<Journal<S>>, identity: impl Into<String>) -> Self {
        Self {
            journal,
            identity: identity.into(),
            status: Arc::new(StatusBoard::new()),
            connectors: DashMap::new(),
            sync_semaphore: Arc::new(Semaphore::new(1)),
            scheduler: std::sync::Mutex::new(None),
            disable_ping: false,
        }
    }

    /// Suppresses the liveness `Ping`/`Pong` round trip on every future exchange.
    pub fn set_disable_ping(&mut self, disable_ping: bool) {
        self.disable_ping = disable_ping;
    }

    pub fn status_board(&self) -> Arc<StatusBoard> {
        self.status.clone()
    }

    fn spawn_fiber(&self, key: String, connector: Arc<dyn Connector>) -> ConnectorHandle {
        let cancellation = CancellationToken::new();
        let journal = self.journal.clone();
        let status = self.status.clone();
        let identity = self.identity.clone();
        let fiber_cancellation = cancellation.clone();
        let fiber_connector = connector.clone();
        let fiber_key = key.clone();
        let disable_ping = self.disable_ping;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = fiber_cancellation.cancelled() => break,
                    result = run_once(&fiber_key, &identity, fiber_connector.as_ref(), &journal, &status, disable_ping) => {
                        if result.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        ConnectorHandle { cancellation, task }
    }

    /// Registers a connector, ensures a status entry exists, and starts a
    /// fiber unless one is already running for this key.
    pub fn connect(&self, key: impl Into<String>, connector: Arc<dyn Connector>, seed: RemoteStatus) {
        let key = key.into();
        self.status.ensure(&key, || seed);

        let needs_spawn = match self.connectors.get(&key) {
            Some(entry) => entry.1.task.is_finished(),
            None => true,
        };
        if needs_spawn {
            let handle = self.spawn_fiber(key.clone(), connector.clone());
            self.connectors.insert(key, (connector, handle));
        }
    }

    /// Interrupts the fiber, removes the connector, and marks disconnected.
    pub async fn disconnect(&self, key: &str) {
        if let Some((_, (_, handle))) = self.connectors.remove(key) {
            handle.cancellation.cancel();
            let _ = handle.task.await;
        }
        self.status.mark_disconnected(key, None);
    }

    /// Restarts every registered connector, serialised so concurrent callers
    /// don't stampede.
    pub async fn sync_now(&self) -> Result<(), SyncError> {
        let _permit = self
            .sync_semaphore
            .acquire()
            .await
            .map_err(|_| SyncError::ShuttingDown)?;

        let keys: Vec<(String, Arc<dyn Connector>)> = self
            .connectors
            .iter()
            .map(|e| (e.key().clone(), e.value().0.clone()))
            .collect();

        for (key, connector) in keys {
            if let Some((_, (_, handle))) = self.connectors.remove(&key) {
                handle.cancellation.cancel();
                let _ = handle.task.await;
            }
            let handle = self.spawn_fiber(key.clone(), connector.clone());
            self.connectors.insert(key, (connector, handle));
        }
        Ok(())
    }

    pub fn status(&self) -> Vec<RemoteStatus> {
        self.status.snapshot()
    }

    pub fn status_stream(&self, key: &str) -> Option<tokio::sync::watch::Receiver<RemoteStatus>> {
        self.status.subscribe(key)
    }

    /// Starts the periodic scheduler if `sync_interval` is set and positive.
    /// A zero or unset interval disables it.
    pub fn start_periodic_sync(self: &Arc<Self>, config: &SyncConfig) {
        let Some(interval) = config.sync_interval else {
            return;
        };
        if interval.is_zero() {
            return;
        }

        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let _ = this.sync_now().await;
            }
        });
        *self.scheduler.lock().unwrap() = Some(task);
    }

    /// Interrupts every connector fiber and the periodic scheduler.
    pub async fn shutdown(&self) {
        if let Some(task) = self.scheduler.lock().unwrap().take() {
            task.abort();
        }
        let keys: Vec<String> = self.connectors.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.disconnect(&key).await;
        }
    }
}

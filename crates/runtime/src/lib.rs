//! loomcore execution core
//!
//! The execution core is the orchestration layer of the loomcore agent
//! runtime: it admits and bounds concurrent agent queries, journals their
//! conversational output into a replicated, log-structured store, and
//! synchronises that store with a central server across multiple replicas.

pub mod config;
pub mod journal;
pub mod kv;
pub mod metrics;
pub mod remote;
pub mod store;
pub mod supervisor;
pub mod sync;
pub mod types;

pub mod prelude;

pub use config::RuntimeConfig;
pub use kv::{KeyValueStore, KvPage, MemoryKvStore};
pub use types::*;

use std::sync::Arc;

use tokio::sync::RwLock;

use journal::{ConflictPolicy, Journal, LastWriteWins};
use store::{ArtifactStore, ChatHistoryStore, SessionIndex};
use supervisor::{ActiveQueryHandle, QueryBackend, QueryOptions, QuerySupervisor, SupervisorEvent, SupervisorStats};
use sync::{Connector, RemoteStatus, SyncService};

/// Ties the query supervisor, journaled store projections, and remote sync
/// service together under one configuration.
///
/// Generic over the backing key-value store `S` and the agent backend `B`;
/// both are supplied by the embedding application.
pub struct ExecutionCore<S: KeyValueStore, B: QueryBackend> {
    config: Arc<RwLock<RuntimeConfig>>,
    journal: Arc<Journal<S>>,
    session_index: Arc<SessionIndex<S>>,
    chat_history: Arc<ChatHistoryStore<S>>,
    artifacts: Arc<ArtifactStore<S>>,
    supervisor: Arc<QuerySupervisor<B>>,
    sync_service: Arc<SyncService<S>>,
}

impl<S: KeyValueStore + Send + Sync + 'static, B: QueryBackend + 'static> ExecutionCore<S, B> {
    /// Wires up every subsystem over a shared key-value store and agent
    /// backend. `identity` is this replica's self-reported id during the
    /// remote `Hello` handshake.
    pub async fn new(
        kv: Arc<S>,
        backend: Arc<B>,
        identity: impl Into<String>,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let conflict_policy: Arc<dyn ConflictPolicy> = Arc::new(LastWriteWins);
        let journal = Arc::new(Journal::open(kv.clone(), "chat-history", conflict_policy).await?);

        let session_index = Arc::new(SessionIndex::new(kv.clone()));
        let chat_history = Arc::new(ChatHistoryStore::new(
            kv.clone(),
            session_index.clone(),
            config.storage.chat_retention(),
            100,
        ));
        let artifacts = Arc::new(ArtifactStore::new(
            kv.clone(),
            session_index.clone(),
            config.storage.artifact_retention(),
        ));

        let supervisor = QuerySupervisor::new(backend, config.supervisor.to_runtime());
        let mut sync_service = SyncService::new(journal.clone(), identity);
        sync_service.set_disable_ping(config.sync.disable_ping);
        let sync_service = Arc::new(sync_service);

        tracing::info!("execution core initialized");

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            journal,
            session_index,
            chat_history,
            artifacts,
            supervisor,
            sync_service,
        })
    }

    pub async fn get_config(&self) -> RuntimeConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: RuntimeConfig) -> Result<(), RuntimeError> {
        config.validate()?;
        *self.config.write().await = config;
        Ok(())
    }

    pub fn journal(&self) -> &Arc<Journal<S>> {
        &self.journal
    }

    pub fn session_index(&self) -> &Arc<SessionIndex<S>> {
        &self.session_index
    }

    pub fn chat_history(&self) -> &Arc<ChatHistoryStore<S>> {
        &self.chat_history
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore<S>> {
        &self.artifacts
    }

    pub fn sync_service(&self) -> &Arc<SyncService<S>> {
        &self.sync_service
    }

    /// Submits a prompt for execution under the supervisor's concurrency
    /// limit and pending-queue discipline.
    pub async fn submit(
        &self,
        prompt: String,
        options: QueryOptions,
    ) -> Result<ActiveQueryHandle, RuntimeError> {
        self.supervisor
            .submit(prompt, options)
            .await
            .map_err(RuntimeError::Supervisor)
    }

    pub fn stats(&self) -> SupervisorStats {
        self.supervisor.stats()
    }

    pub fn events(&self) -> futures::stream::BoxStream<'static, SupervisorEvent> {
        self.supervisor.events()
    }

    /// Registers a remote and starts its connector fiber.
    pub fn connect_remote(&self, key: impl Into<String>, connector: Arc<dyn Connector>, seed: RemoteStatus) {
        self.sync_service.connect(key, connector, seed);
    }

    pub fn remote_status(&self) -> Vec<RemoteStatus> {
        self.sync_service.status()
    }

    /// Starts the sync service's periodic `syncNow` sweep if configured.
    pub async fn start_sync(&self) {
        let sync_config = self.config.read().await.sync.to_runtime();
        self.sync_service.start_periodic_sync(&sync_config);
    }

    /// Interrupts every active query, drains and cancels the pending queue,
    /// and stops all connector fibers.
    pub async fn shutdown(&self) {
        tracing::info!("execution core shutting down");
        self.supervisor.shutdown().await;
        self.sync_service.shutdown().await;
    }
}

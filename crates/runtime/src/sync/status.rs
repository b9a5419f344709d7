//! Live status of each configured remote, published over a watch channel.

use dashmap::DashMap;
use tokio::sync::watch;

use crate::types::RemoteId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    RemoteId,
    Url,
}

/// `{key, kind, remoteId, url?, connected, lastSyncAt?, lastError?}`.
/// Created on first connect attempt, updated on transition, never deleted
/// while the connector is registered.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteStatus {
    pub key: String,
    pub kind: RemoteKind,
    pub remote_id: Option<RemoteId>,
    pub url: Option<String>,
    pub connected: bool,
    pub last_sync_at: Option<u64>,
    pub last_error: Option<String>,
}

impl RemoteStatus {
    pub fn new_url(key: String, url: String) -> Self {
        Self {
            key,
            kind: RemoteKind::Url,
            remote_id: None,
            url: Some(url),
            connected: false,
            last_sync_at: None,
            last_error: None,
        }
    }

    pub fn new_remote_id(key: String, remote_id: RemoteId) -> Self {
        Self {
            key,
            kind: RemoteKind::RemoteId,
            remote_id: Some(remote_id),
            url: None,
            connected: false,
            last_sync_at: None,
            last_error: None,
        }
    }
}

/// Snapshot and change-feed map of every registered remote's status.
#[derive(Default)]
pub struct StatusBoard {
    senders: DashMap<String, watch::Sender<RemoteStatus>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a status entry exists for `key`, seeding it with `initial` if absent.
    pub fn ensure(&self, key: &str, initial: impl FnOnce() -> RemoteStatus) -> watch::Receiver<RemoteStatus> {
        self.senders
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(initial()).0)
            .subscribe()
    }

    pub fn mark_connected(&self, key: &str, now_millis: u64) {
        if let Some(sender) = self.senders.get(key) {
            sender.send_modify(|s| {
                s.connected = true;
                s.last_sync_at = Some(now_millis);
                s.last_error = None;
            });
        }
    }

    pub fn mark_disconnected(&self, key: &str, error: Option<String>) {
        if let Some(sender) = self.senders.get(key) {
            sender.send_modify(|s| {
                s.connected = false;
                if let Some(error) = error {
                    s.last_error = Some(error);
                }
            });
        }
    }

    pub fn remove(&self, key: &str) {
        self.senders.remove(key);
    }

    pub fn snapshot(&self) -> Vec<RemoteStatus> {
        self.senders.iter().map(|e| e.value().borrow().clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<RemoteStatus> {
        self.senders.get(key).map(|e| e.borrow().clone())
    }

    pub fn subscribe(&self, key: &str) -> Option<watch::Receiver<RemoteStatus>> {
        self.senders.get(key).map(|e| e.subscribe())
    }
}
